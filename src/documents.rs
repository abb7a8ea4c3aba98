//! `docent documents`: print the document catalog.

use anyhow::Result;

use docent_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_documents(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let docs = store.list_documents().await?;
    pool.close().await;

    if docs.is_empty() {
        println!("No documents. Run `docent ingest <path>` first.");
        return Ok(());
    }

    println!("{:<40} {:<18} {:<28} NAME", "FILE", "TYPE", "PRODUCT");
    for doc in &docs {
        let product = format!("{} {}", doc.manufacturer, doc.model);
        println!(
            "{:<40} {:<18} {:<28} {}",
            doc.file_name,
            if doc.doc_type.is_empty() { "-" } else { doc.doc_type.as_str() },
            if product.trim().is_empty() { "-" } else { product.trim() },
            doc.display_name()
        );
    }
    println!();
    println!("{} documents", docs.len());
    Ok(())
}

//! Language-model implementations of the structuring capabilities.
//!
//! [`ModelPageStructurer`] asks the model to re-emit a page as `H1`/`H2`/
//! `H3`/`BODY` elements. [`ModelMetadataExtractor`] asks for the document's
//! title, type, description, manufacturer and model in tagged form and
//! reads the answer back with [`get_tag`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::capability::{LanguageModel, MetadataExtractor, PageStructurer};
use crate::models::DocumentMetadata;
use crate::tags::get_tag;

/// Document types the metadata extractor may assign, with descriptions.
pub const DOCUMENT_TYPES: &[(&str, &str)] = &[
    (
        "service_manual",
        "Installation, maintenance and troubleshooting instructions for equipment.",
    ),
    (
        "repair_log",
        "Records of past repairs, replaced parts, diagnostics and corrective actions.",
    ),
    (
        "tech_bulletin",
        "Manufacturer technical or field service bulletins about known issues and fixes.",
    ),
    (
        "install_guide",
        "Step-by-step setup and configuration instructions for machinery.",
    ),
    (
        "troubleshoot_guide",
        "Symptom or error-code driven guides for diagnosing common problems.",
    ),
    (
        "operation_manual",
        "Operating procedures, safety guidelines and day-to-day usage.",
    ),
    (
        "spec_sheet",
        "Product data sheets: dimensions, performance figures and tolerances.",
    ),
    (
        "incident_report",
        "Equipment failures or safety incidents, with root cause and resolution.",
    ),
    (
        "change_doc",
        "Engineering change orders and change-control records.",
    ),
    (
        "field_notes",
        "Informal technician notes capturing undocumented fixes.",
    ),
];

/// The type catalog as prompt text, one `name: description` per line.
pub fn type_catalog() -> String {
    DOCUMENT_TYPES
        .iter()
        .map(|(name, desc)| format!("{}: {}", name, desc))
        .collect::<Vec<_>>()
        .join("\n")
}

fn structure_prompt(page_text: &str) -> String {
    format!(
        r#"<CURRENT_PAGE>
{page_text}
</CURRENT_PAGE>

TASK
----
The page above was extracted from a larger technical document, possibly by OCR.
Rewrite its content as a sequence of tagged elements:

- a main heading, verbatim, in <H1></H1>
- a section heading, verbatim, in <H2></H2>
- a sub-section heading, verbatim, in <H3></H3>
- any block of body text, verbatim, in <BODY></BODY>

RULES
-----
- Include all of the page content.
- Use no tags other than H1, H2, H3 and BODY.
- Drop characters that are clearly extraction noise.
"#
    )
}

fn metadata_prompt(file_name: &str, head: &str, catalog: &str) -> String {
    format!(
        r#"<DOCUMENT>
{file_name}
{head}
</DOCUMENT>

<TYPES>
{catalog}
</TYPES>

TASK
----
Extract metadata from the opening pages in <DOCUMENT>:

- the document title, in <NAME></NAME>
- its type, one of the names listed in <TYPES>, in <TYPE></TYPE>
- what the document covers and what information it holds, in <DESCRIPTION></DESCRIPTION>
- the manufacturer or brand, for equipment-specific documents, in <MANUFACTURER></MANUFACTURER>
- the product model or model family, for equipment-specific documents, in <MODEL></MODEL>

RULES
-----
- Write only the five tags above.
- Leave a tag empty when the information is not present.
- Ignore text that is clearly extraction noise.
"#
    )
}

/// Page structurer backed by a language model.
pub struct ModelPageStructurer {
    model: Arc<dyn LanguageModel>,
}

impl ModelPageStructurer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl PageStructurer for ModelPageStructurer {
    async fn structure_page(&self, page_text: &str) -> Result<String> {
        Ok(self.model.complete(&structure_prompt(page_text)).await?)
    }
}

/// Metadata extractor backed by a language model.
pub struct ModelMetadataExtractor {
    model: Arc<dyn LanguageModel>,
}

impl ModelMetadataExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl MetadataExtractor for ModelMetadataExtractor {
    async fn extract(
        &self,
        file_name: &str,
        document_head: &str,
        type_catalog: &str,
    ) -> Result<DocumentMetadata> {
        let response = self
            .model
            .complete(&metadata_prompt(file_name, document_head, type_catalog))
            .await?;
        Ok(parse_metadata(&response))
    }
}

/// Read the five metadata tags from a model response.
pub fn parse_metadata(response: &str) -> DocumentMetadata {
    let field = |tag: &str| get_tag(response, tag).trim().to_string();
    DocumentMetadata {
        name: field("NAME"),
        doc_type: field("TYPE"),
        description: field("DESCRIPTION"),
        manufacturer: field("MANUFACTURER"),
        model: field("MODEL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CompletionError;
    use std::sync::Mutex;

    struct Recording {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Recording {
        async fn complete(&self, prompt: &str) -> std::result::Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_type_catalog_lists_every_type() {
        let catalog = type_catalog();
        assert_eq!(catalog.lines().count(), DOCUMENT_TYPES.len());
        assert!(catalog.starts_with("service_manual: "));
        assert!(catalog.contains("field_notes: "));
    }

    #[test]
    fn test_parse_metadata_missing_tags_are_empty() {
        let meta = parse_metadata(
            "<NAME> HX-200 Service Manual </NAME><TYPE>service_manual</TYPE><MANUFACTURER></MANUFACTURER>",
        );
        assert_eq!(meta.name, "HX-200 Service Manual");
        assert_eq!(meta.doc_type, "service_manual");
        assert_eq!(meta.manufacturer, "");
        assert_eq!(meta.model, "");
    }

    #[tokio::test]
    async fn test_metadata_extractor_prompts_with_head_and_catalog() {
        let model = Arc::new(Recording {
            reply: "<NAME>Pump</NAME><MODEL>P-9</MODEL>".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let extractor = ModelMetadataExtractor::new(model.clone());
        let meta = extractor
            .extract("pump.pdf", "first page text", &type_catalog())
            .await
            .unwrap();
        assert_eq!(meta.name, "Pump");
        assert_eq!(meta.model, "P-9");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("pump.pdf\nfirst page text"));
        assert!(prompts[0].contains("tech_bulletin"));
    }

    #[tokio::test]
    async fn test_page_structurer_passes_model_output_through() {
        let model = Arc::new(Recording {
            reply: "<H1>Intro</H1><BODY>Hello</BODY>".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let structurer = ModelPageStructurer::new(model.clone());
        let out = structurer.structure_page("Intro\nHello").await.unwrap();
        assert_eq!(out, "<H1>Intro</H1><BODY>Hello</BODY>");
        assert!(model.prompts.lock().unwrap()[0].contains("<CURRENT_PAGE>\nIntro\nHello\n"));
    }
}

//! Turns an artifact request into an ordered multimodal payload.
//!
//! Pure transformation: no network, no filesystem. The first segment is always
//! the rendered instruction; every evidence item then contributes exactly one
//! segment, in snapshot order.

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat};
use tracing::{debug, instrument};

use crate::catalog::{ArtifactType, InstructionCatalog};
use crate::error::{ClarityError, Result};
use crate::evidence::{EvidenceItem, EvidenceSnapshot};

/// Label prefixed to every note in the payload
pub const ADDITIONAL_CONTEXT_LABEL: &str = "ADDITIONAL CONTEXT:";

/// One unit of a multimodal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Image { data: Vec<u8>, mime_type: String },
}

impl Segment {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(text) => Some(text),
            Segment::Image { .. } => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Segment::Image { .. })
    }
}

pub type Payload = Vec<Segment>;

/// Raster format images are re-encoded to before transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageEncoding {
    #[default]
    Png,
    Jpeg { quality: u8 },
}

impl ImageEncoding {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg { .. } => "image/jpeg",
        }
    }

    /// Encode `image` into an in-memory buffer.
    pub fn encode(self, image: &DynamicImage) -> std::result::Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        match self {
            ImageEncoding::Png => image.write_to(&mut cursor, ImageOutputFormat::Png)?,
            ImageEncoding::Jpeg { quality } => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))?;
            }
        }
        Ok(bytes)
    }
}

/// Everything needed for one generation call. Built fresh per trigger and
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub artifact_type: ArtifactType,
    pub model_identifier: String,
    pub evidence_snapshot: EvidenceSnapshot,
    pub domain_context: Option<String>,
    pub free_text_instruction: Option<String>,
}

impl ArtifactRequest {
    pub fn new(
        artifact_type: ArtifactType,
        model_identifier: impl Into<String>,
        evidence_snapshot: EvidenceSnapshot,
    ) -> Self {
        Self {
            artifact_type,
            model_identifier: model_identifier.into(),
            evidence_snapshot,
            domain_context: None,
            free_text_instruction: None,
        }
    }

    pub fn with_domain_context(mut self, context: Option<String>) -> Self {
        self.domain_context = context;
        self
    }

    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        self.free_text_instruction = instruction;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayloadAssembler {
    catalog: InstructionCatalog,
    encoding: ImageEncoding,
}

impl PayloadAssembler {
    pub fn new(catalog: InstructionCatalog, encoding: ImageEncoding) -> Self {
        Self { catalog, encoding }
    }

    pub fn catalog(&self) -> &InstructionCatalog {
        &self.catalog
    }

    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    #[instrument(skip_all, fields(artifact = %artifact_type, items = snapshot.len()))]
    pub fn assemble(
        &self,
        artifact_type: ArtifactType,
        snapshot: &EvidenceSnapshot,
        domain_context: Option<&str>,
        free_text_instruction: Option<&str>,
    ) -> Result<Payload> {
        let instruction = self
            .catalog
            .render(artifact_type, domain_context, free_text_instruction);

        let mut payload = Vec::with_capacity(1 + snapshot.len());
        payload.push(Segment::Text(instruction));

        for item in snapshot.iter() {
            payload.push(self.segment_for(item)?);
        }

        debug!(segments = payload.len(), "payload assembled");
        Ok(payload)
    }

    pub fn assemble_request(&self, request: &ArtifactRequest) -> Result<Payload> {
        self.assemble(
            request.artifact_type,
            &request.evidence_snapshot,
            request.domain_context.as_deref(),
            request.free_text_instruction.as_deref(),
        )
    }

    /// Instruction plus a single observation image, for ambient tips.
    pub fn assemble_observation(
        &self,
        observation: &DynamicImage,
        domain_context: Option<&str>,
    ) -> Result<Payload> {
        let instruction = self.catalog.ambient_tip_instruction(domain_context);
        let image = self.encode_image(observation, "observation")?;
        Ok(vec![Segment::Text(instruction), image])
    }

    fn segment_for(&self, item: &EvidenceItem) -> Result<Segment> {
        match item {
            EvidenceItem::Text { content, .. } => Ok(Segment::Text(format!(
                "\n{ADDITIONAL_CONTEXT_LABEL} {content}\n"
            ))),
            EvidenceItem::Image { pixels, label } => self.encode_image(pixels, label),
        }
    }

    fn encode_image(&self, image: &DynamicImage, label: &str) -> Result<Segment> {
        let data = self
            .encoding
            .encode(image)
            .map_err(|e| ClarityError::image_encoding(label, e.to_string()))?;
        Ok(Segment::Image {
            data,
            mime_type: self.encoding.mime_type().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::tests::png_bytes;
    use crate::evidence::EvidenceStore;

    fn assembler() -> PayloadAssembler {
        PayloadAssembler::default()
    }

    #[test]
    fn text_then_image_keeps_insertion_order() {
        let mut store = EvidenceStore::new();
        store.add_text("Button must validate email");
        store.add_image(&png_bytes(3, 3), "login.png");

        let payload = assembler()
            .assemble(ArtifactType::Pbi, &store.snapshot(), None, None)
            .unwrap();

        assert_eq!(payload.len(), 3);
        assert!(payload[0].as_text().unwrap().contains("# PBI:"));
        assert!(payload[1]
            .as_text()
            .unwrap()
            .contains("ADDITIONAL CONTEXT: Button must validate email"));
        assert!(payload[2].is_image());
    }

    #[test]
    fn image_then_text_keeps_insertion_order() {
        let mut store = EvidenceStore::new();
        store.add_image(&png_bytes(3, 3), "login.png");
        store.add_text("Button must validate email");

        let payload = assembler()
            .assemble(ArtifactType::Pbi, &store.snapshot(), None, None)
            .unwrap();

        assert_eq!(payload.len(), 3);
        assert!(payload[1].is_image());
        assert!(payload[2]
            .as_text()
            .unwrap()
            .contains("ADDITIONAL CONTEXT: Button must validate email"));
    }

    #[test]
    fn empty_snapshot_yields_instruction_only() {
        let payload = assembler()
            .assemble(ArtifactType::Bug, &EvidenceSnapshot::default(), None, None)
            .unwrap();
        assert_eq!(payload.len(), 1);
        assert!(payload[0].as_text().unwrap().contains("# BUG:"));
    }

    #[test]
    fn context_and_instruction_are_interpolated() {
        let payload = assembler()
            .assemble(
                ArtifactType::TechnicalTask,
                &EvidenceSnapshot::default(),
                Some("Insurance claims portal"),
                Some("Focus on the upload endpoint"),
            )
            .unwrap();
        let instruction = payload[0].as_text().unwrap();
        assert!(instruction.contains("Insurance claims portal"));
        assert!(instruction.contains("Focus on the upload endpoint"));
    }

    #[test]
    fn png_segment_decodes_back_to_same_dimensions() {
        let mut store = EvidenceStore::new();
        store.add_image(&png_bytes(5, 7), "screen.png");

        let payload = assembler()
            .assemble(ArtifactType::Pbi, &store.snapshot(), None, None)
            .unwrap();
        let Segment::Image { data, mime_type } = &payload[1] else {
            panic!("expected image segment");
        };
        assert_eq!(mime_type, "image/png");
        let decoded = image::load_from_memory(data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (5, 7));
    }

    #[test]
    fn jpeg_encoding_handles_alpha_images() {
        let rgba = DynamicImage::new_rgba8(4, 4);
        let mut store = EvidenceStore::new();
        store.add_decoded_image(rgba, "overlay.png");

        let assembler = PayloadAssembler::new(
            InstructionCatalog::builtin(),
            ImageEncoding::Jpeg { quality: 70 },
        );
        let payload = assembler
            .assemble(ArtifactType::Pbi, &store.snapshot(), None, None)
            .unwrap();
        assert_eq!(
            payload[1],
            Segment::Image {
                data: ImageEncoding::Jpeg { quality: 70 }
                    .encode(&DynamicImage::new_rgba8(4, 4))
                    .unwrap(),
                mime_type: "image/jpeg".to_string(),
            }
        );
    }

    #[test]
    fn observation_payload_has_instruction_and_image() {
        let payload = assembler()
            .assemble_observation(&DynamicImage::new_rgb8(2, 2), Some("HR system"))
            .unwrap();
        assert_eq!(payload.len(), 2);
        assert!(payload[0].as_text().unwrap().contains("HR system"));
        assert!(payload[1].is_image());
    }
}

pub mod ambient;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod evidence;
pub mod generator;
pub mod images;
pub mod observation;
pub mod payload;
pub mod session;
pub mod writer;

pub use ambient::{AmbientHandle, AmbientLoop};
pub use catalog::{ArtifactType, InstructionCatalog};
pub use config::{ClarityConfig, CredentialMode, Credentials};
pub use context::DomainContext;
pub use error::{ClarityError, FailureKind, Result};
pub use evidence::{AddOutcome, EvidenceItem, EvidenceSnapshot, EvidenceStore};
pub use generator::{Generated, GenerationParams, GenerationResult, Generator, MockGenerator};
pub use observation::{LatestImageSource, Observation, ObservationSource};
pub use payload::{ArtifactRequest, ImageEncoding, Payload, PayloadAssembler, Segment};
pub use session::{AmbientStart, Session, SessionEvent, TriggerOutcome};
pub use writer::{ArtifactWriter, NamingMode};

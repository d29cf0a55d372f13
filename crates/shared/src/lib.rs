// Public modules
pub mod classify;
pub mod collectors;
pub mod composer;
pub mod config;
pub mod curator;
pub mod emailer;
pub mod extractor;
pub mod models;
pub mod run;
pub mod scoring;
pub mod selector;
pub mod store;

// Re-export commonly used types
pub use classify::SourceClassifier;
pub use collectors::{Collector, EditorPicksCollector};
pub use composer::ComposedEdition;
pub use config::Config;
pub use curator::{Curator, Judge};
pub use emailer::{DispatchReport, ResendTransport, Transport};
pub use extractor::ContentExtractor;
pub use models::{Article, Category, Edition, EditionStatus, Scores};
pub use run::RunContext;
pub use selector::{Selection, SelectionParams};
pub use store::{RunStatus, Store};

pub mod ollama;
pub use ollama::OllamaCompute;

use async_trait::async_trait;

/// The long-latency collaborator a service calls to produce an answer.
///
/// Implementations never fail at this boundary: transient trouble is retried
/// internally and a final failure comes back as an error-describing string,
/// so the service can always frame a reply.
#[async_trait]
pub trait Compute: Send + Sync {
    async fn ask(&self, prompt: &str) -> String;
}

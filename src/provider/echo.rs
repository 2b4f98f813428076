use super::{GenerationError, ModelVariant, ResponseClient};
use futures_core::future::BoxFuture;
use std::time::Duration;

/// Offline client: answers every prompt by echoing it back after a short,
/// network-like pause. Useful for trying the chat without credentials.
#[derive(Debug, Clone)]
pub struct EchoClient {
    model: ModelVariant,
    latency: Duration,
}

impl EchoClient {
    pub fn new(model: ModelVariant) -> Self {
        Self {
            model,
            latency: Duration::from_millis(300),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl ResponseClient for EchoClient {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn model(&self) -> ModelVariant {
        self.model
    }

    fn generate(&self, prompt: String) -> BoxFuture<'static, Result<String, GenerationError>> {
        let latency = self.latency;
        let model = self.model;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            Ok(format!("[{model}] You said: {prompt}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn echoes_after_latency() {
        let client = EchoClient::new(ModelVariant::Flash15).with_latency(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        let text = client.generate("ping".into()).await.unwrap();
        assert_eq!(text, "[gemini-1.5-flash] You said: ping");
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}

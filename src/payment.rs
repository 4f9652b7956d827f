use async_trait::async_trait;
use ulid::Ulid;

/// External payment check. The engine only acts on the yes/no answer.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, booking_id: Ulid) -> bool;
}

/// Fixed answer, for deployments without a gateway and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticVerifier {
    approve: bool,
}

impl StaticVerifier {
    pub fn approving() -> Self {
        Self { approve: true }
    }

    pub fn declining() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl PaymentVerifier for StaticVerifier {
    async fn verify(&self, _booking_id: Ulid) -> bool {
        self.approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_answers() {
        assert!(StaticVerifier::approving().verify(Ulid::new()).await);
        assert!(!StaticVerifier::declining().verify(Ulid::new()).await);
    }
}

use super::pool::ExecutionPool;
use super::processor::CommandProcessor;
use std::collections::HashMap;
use std::sync::Arc;

/// A processor and the pool its work runs on
#[derive(Clone)]
pub struct ProcessorPair {
    pub processor: Arc<dyn CommandProcessor>,
    pub pool: Arc<dyn ExecutionPool>,
}

impl ProcessorPair {
    pub fn new(processor: Arc<dyn CommandProcessor>, pool: Arc<dyn ExecutionPool>) -> Self {
        Self { processor, pool }
    }
}

impl std::fmt::Debug for ProcessorPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorPair")
            .field("pool", &self.pool.name())
            .finish_non_exhaustive()
    }
}

/// Routing table from command code to processor.
///
/// Populated before the owning service is built and read-only afterwards.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<i32, ProcessorPair>,
    default: Option<ProcessorPair>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::with_capacity(64),
            default: None,
        }
    }

    /// Route `code` to `processor`, replacing any earlier registration
    pub fn register(
        &mut self,
        code: i32,
        processor: Arc<dyn CommandProcessor>,
        pool: Arc<dyn ExecutionPool>,
    ) {
        self.processors
            .insert(code, ProcessorPair::new(processor, pool));
    }

    /// Route every unregistered code to `processor`
    pub fn set_default(&mut self, processor: Arc<dyn CommandProcessor>, pool: Arc<dyn ExecutionPool>) {
        self.default = Some(ProcessorPair::new(processor, pool));
    }

    /// The pair for `code`, falling back to the default
    pub fn lookup(&self, code: i32) -> Option<&ProcessorPair> {
        self.processors.get(&code).or(self.default.as_ref())
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Explicitly registered codes, sorted
    pub fn codes(&self) -> Vec<i32> {
        let mut codes: Vec<i32> = self.processors.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty() && self.default.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use crate::remoting::pool::SpawnPool;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Named(&'static str);

    #[async_trait]
    impl CommandProcessor for Named {
        async fn process_command(&self, _command: Command) -> anyhow::Result<Option<Command>> {
            Ok(Some(Command::response(0).with_body(self.0)))
        }

        async fn try_acquire_failure(&self, _timeout: Duration) -> bool {
            false
        }

        fn release(&self) {}
    }

    async fn answer(pair: &ProcessorPair) -> Vec<u8> {
        pair.processor
            .process_command(Command::request(0, 0))
            .await
            .unwrap()
            .unwrap()
            .into_body()
    }

    #[tokio::test]
    async fn test_lookup_prefers_specific_registration() {
        let pool: Arc<dyn ExecutionPool> = Arc::new(SpawnPool::new("test"));
        let mut registry = ProcessorRegistry::new();
        registry.register(7, Arc::new(Named("seven")), pool.clone());
        registry.set_default(Arc::new(Named("default")), pool);

        assert_eq!(answer(registry.lookup(7).unwrap()).await, b"seven");
        assert_eq!(answer(registry.lookup(8).unwrap()).await, b"default");
        assert_eq!(registry.codes(), vec![7]);
    }

    #[test]
    fn test_lookup_without_default() {
        let pool: Arc<dyn ExecutionPool> = Arc::new(SpawnPool::new("test"));
        let mut registry = ProcessorRegistry::new();
        assert!(registry.is_empty());

        registry.register(1, Arc::new(Named("one")), pool);
        assert!(registry.lookup(1).is_some());
        assert!(registry.lookup(2).is_none());
        assert!(!registry.has_default());
        assert_eq!(registry.len(), 1);
    }
}

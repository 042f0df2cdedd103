use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::dead_letter::DeadLetterChannelView;
use crate::processor::{MessageProcessor, ProcessorStatus};

/// Processors by name
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: DashMap<String, Arc<MessageProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, replacing any previous one with the same name
    pub fn register(&self, processor: Arc<MessageProcessor>) -> Option<Arc<MessageProcessor>> {
        self.processors.insert(processor.name().to_string(), processor)
    }

    pub fn get(&self, name: &str) -> Option<Arc<MessageProcessor>> {
        self.processors.get(name).map(|p| p.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn all(&self) -> Vec<Arc<MessageProcessor>> {
        let mut all: Vec<_> = self.processors.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub async fn statuses(&self) -> Vec<ProcessorStatus> {
        let mut statuses = Vec::new();
        for processor in self.all() {
            statuses.push(processor.status().await);
        }
        statuses
    }

    pub async fn start_all(&self) {
        for processor in self.all() {
            processor.start().await;
        }
    }

    pub async fn stop_all(&self) {
        let processors = self.all();
        info!(count = processors.len(), "Stopping message processors");
        for processor in processors {
            processor.stop().await;
        }
    }

    /// Management view over the dead-letter store of `name`
    pub fn dead_letter_view(self: &Arc<Self>, name: &str) -> Option<DeadLetterChannelView> {
        let processor = self.get(name)?;
        Some(DeadLetterChannelView::new(
            processor.dead_letter_store().clone(),
            self.clone(),
            processor.environment().codec().clone(),
        ))
    }
}

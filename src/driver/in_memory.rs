//! Channel-backed driver for tests and local experiments: same
//! topology, no broker. Everything the topology publishes lands in
//! `created_messages`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{channel, Sender};
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::topology::Topology;
use crate::Message;

pub struct InMemoryDriver {
    input_tx: Sender<Message>,
    pub created_messages: Arc<Mutex<Vec<Message>>>,
    task: JoinHandle<()>,
}

impl InMemoryDriver {
    pub fn start(mut topology: Topology) -> InMemoryDriver {
        log::debug!("start in memory driver");

        let (input_tx, mut input_rx) = channel::<Message>(64);
        let created_messages = Arc::new(Mutex::new(Vec::new()));
        let created = created_messages.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = input_rx.recv().await {
                let outputs = topology.apply(&message);
                created
                    .lock()
                    .expect("created messages lock poisoned")
                    .extend(outputs);
            }

            // input channel closed: graceful shutdown
            let flushed = topology.flush();
            created
                .lock()
                .expect("created messages lock poisoned")
                .extend(flushed);

            log::debug!("in memory driver loop stopped");
        });

        InMemoryDriver {
            input_tx,
            created_messages,
            task,
        }
    }

    /// Inject a source-topic record, as if consumed from the broker.
    pub async fn write_to(&self, message: Message) {
        log::debug!("write test message to topic {}", message.topic);

        self.input_tx
            .send(message)
            .await
            .expect("in memory driver loop is gone")
    }
}

#[async_trait]
impl super::Driver for InMemoryDriver {
    async fn stop(self) -> Result<(), PipelineError> {
        log::debug!("stopping in memory driver");

        drop(self.input_tx);
        self.task
            .await
            .map_err(|e| PipelineError::Driver(e.to_string()))
    }
}

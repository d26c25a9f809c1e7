use meshrun_model::StateOptions;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Events emitted by a runner while driving its queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerEvent {
    Submitted {
        case: String,
        stage: String,
        jobid: String,
    },
    StageFinished {
        case: String,
        stage: String,
        state: StateOptions,
    },
    Failed {
        case: String,
        stage: String,
        reason: String,
    },
    Finished {
        case: String,
    },
}

/// Case-level lifecycle events raised by the monitor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    Started,
    Stopped,
    Finished,
    CaseCompleted {
        case: String,
    },
    StageChanged {
        case: String,
        stage: String,
        state: StateOptions,
    },
}

pub trait EventObserver<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventObserver<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event);
    }
}

pub type SharedEventObserver<E> = Arc<dyn EventObserver<E>>;
pub type EventSender<E> = mpsc::UnboundedSender<E>;
pub type EventReceiver<E> = mpsc::UnboundedReceiver<E>;

/// Fan-out sink carrying an optional observer and an optional
/// unbounded channel sender.
#[derive(Clone)]
pub struct EventSink<E> {
    observer: Option<SharedEventObserver<E>>,
    sender: Option<EventSender<E>>,
}

impl<E> Default for EventSink<E> {
    fn default() -> Self {
        Self {
            observer: None,
            sender: None,
        }
    }
}

impl<E: Clone> EventSink<E> {
    pub fn with_observer(observer: SharedEventObserver<E>) -> Self {
        Self {
            observer: Some(observer),
            sender: None,
        }
    }

    pub fn with_sender(sender: EventSender<E>) -> Self {
        Self {
            observer: None,
            sender: Some(sender),
        }
    }

    pub fn observer(mut self, observer: SharedEventObserver<E>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sender(mut self, sender: EventSender<E>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some() || self.sender.is_some()
    }

    pub fn emit(&self, event: E) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(&event);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }
}

pub fn event_channel<E>() -> (EventSender<E>, EventReceiver<E>) {
    mpsc::unbounded_channel()
}

/// Receives the raw backend output stream for display.
pub trait ConsoleSink: Send + Sync {
    fn append(&self, text: &str);
}

pub type SharedConsoleSink = Arc<dyn ConsoleSink>;

#[derive(Default)]
pub struct NoopConsole;

impl ConsoleSink for NoopConsole {
    fn append(&self, _text: &str) {}
}

/// Accumulates console output in memory; used by tests and by front
/// ends that render the log after the fact.
#[derive(Clone, Default)]
pub struct BufferedConsole {
    inner: Arc<Mutex<String>>,
}

impl BufferedConsole {
    pub fn snapshot(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConsoleSink for BufferedConsole {
    fn append(&self, text: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_sink_observer_and_sender_both_receive() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer_seen = Arc::clone(&seen);
        let observer: SharedEventObserver<MonitorEvent> =
            Arc::new(move |event: &MonitorEvent| {
                observer_seen
                    .lock()
                    .expect("observer mutex should lock")
                    .push(event.clone());
            });
        let (tx, mut rx) = event_channel();
        let sink = EventSink::with_observer(observer).sender(tx);

        sink.emit(MonitorEvent::Started);

        assert_eq!(rx.try_recv(), Ok(MonitorEvent::Started));
        assert_eq!(
            seen.lock().expect("observer mutex should lock").as_slice(),
            &[MonitorEvent::Started]
        );
    }

    #[test]
    fn buffered_console_accumulates_appends() {
        let console = BufferedConsole::default();
        console.append("line one\n");
        console.append("line two\n");
        assert_eq!(console.snapshot(), "line one\nline two\n");
    }
}

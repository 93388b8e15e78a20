use crate::handler::Message;
use parking_lot::Mutex;
use std::sync::Arc;

/// One state of a hierarchical session state machine.
///
/// A state that does not handle a message defers to its parent; dispatch
/// walks the chain until a state reports the message handled.
pub trait State: Send + Sync {
    fn name(&self) -> &'static str;

    fn enter(&self) {}
    fn exit(&self) {}

    /// Return `true` when the message was consumed.
    fn handle_message(&self, msg: &Message) -> bool;

    fn parent(&self) -> Option<Arc<dyn State>> {
        None
    }
}

/// Tracks the current state and routes messages through the parent chain.
#[derive(Default)]
pub struct StateMachine {
    current: Mutex<Option<Arc<dyn State>>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer_state(&self, next: Arc<dyn State>) {
        let mut current = self.current.lock();
        if let Some(old) = current.as_ref() {
            log::debug!("leaving state {}", old.name());
            old.exit();
        }
        log::debug!("entering state {}", next.name());
        next.enter();
        *current = Some(next);
    }

    pub fn current_state(&self) -> Option<Arc<dyn State>> {
        self.current.lock().clone()
    }

    /// Dispatch up the parent chain until a state handles the message.
    pub fn dispatch(&self, msg: &Message) -> bool {
        let mut state = self.current.lock().clone();
        while let Some(s) = state {
            if s.handle_message(msg) {
                return true;
            }
            state = s.parent();
        }
        log::warn!("message {} not handled by any state", msg.what);
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Root {
        handled: AtomicUsize,
    }

    impl State for Root {
        fn name(&self) -> &'static str {
            "root"
        }

        fn handle_message(&self, msg: &Message) -> bool {
            if msg.what == 1 {
                self.handled.fetch_add(1, Ordering::SeqCst);
                return true;
            }
            false
        }
    }

    struct Child {
        parent: Arc<Root>,
    }

    impl State for Child {
        fn name(&self) -> &'static str {
            "child"
        }

        fn handle_message(&self, msg: &Message) -> bool {
            msg.what == 2
        }

        fn parent(&self) -> Option<Arc<dyn State>> {
            Some(self.parent.clone())
        }
    }

    #[test]
    fn unhandled_messages_walk_up_the_chain() {
        let root = Arc::new(Root::default());
        let machine = StateMachine::new();
        machine.transfer_state(Arc::new(Child {
            parent: root.clone(),
        }));

        assert!(machine.dispatch(&Message::new(2)));
        assert_eq!(root.handled.load(Ordering::SeqCst), 0);

        assert!(machine.dispatch(&Message::new(1)));
        assert_eq!(root.handled.load(Ordering::SeqCst), 1);

        assert!(!machine.dispatch(&Message::new(3)));
    }
}

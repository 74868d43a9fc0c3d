use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::model::ReactiveModel;
use crate::session::{Transport, ViewId, ViewSession};
use crate::tree::{ComponentTree, LayoutEvent, RenderOutput, TreeError};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Tree double whose renders are fed by a [`Script`] and whose dispatched
/// events are recorded.
pub(crate) struct ScriptedTree {
    renders: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<RenderOutput, TreeError>>>,
    dispatched: Mutex<std_mpsc::Sender<LayoutEvent>>,
    fail_enter: bool,
    pub entered: AtomicUsize,
    pub exited: AtomicUsize,
}

pub(crate) struct Script {
    renders: mpsc::UnboundedSender<Result<RenderOutput, TreeError>>,
    pub events: std_mpsc::Receiver<LayoutEvent>,
}

impl ScriptedTree {
    pub(crate) fn parts() -> (Self, Script) {
        Self::build(false)
    }

    pub(crate) fn new() -> (Arc<Self>, Script) {
        let (tree, script) = Self::build(false);
        (Arc::new(tree), script)
    }

    pub(crate) fn failing_enter() -> (Arc<Self>, Script) {
        let (tree, script) = Self::build(true);
        (Arc::new(tree), script)
    }

    fn build(fail_enter: bool) -> (Self, Script) {
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = std_mpsc::channel();

        let tree = Self {
            renders: tokio::sync::Mutex::new(render_rx),
            dispatched: Mutex::new(event_tx),
            fail_enter,
            entered: AtomicUsize::new(0),
            exited: AtomicUsize::new(0),
        };
        let script = Script {
            renders: render_tx,
            events: event_rx,
        };

        (tree, script)
    }
}

impl Script {
    pub(crate) fn render(&self, model: Value) {
        self.renders
            .send(Ok(RenderOutput::new("", model)))
            .expect("tree still mounted");
    }

    pub(crate) fn fail(&self, reason: &str) {
        self.renders
            .send(Err(TreeError::Render(reason.to_string())))
            .expect("tree still mounted");
    }

    pub(crate) fn next_event(&self) -> LayoutEvent {
        self.events.recv_timeout(WAIT).expect("event dispatched")
    }
}

#[async_trait]
impl ComponentTree for ScriptedTree {
    fn enter(&self) -> Result<(), TreeError> {
        if self.fail_enter {
            return Err(TreeError::Mount("scripted failure".to_string()));
        }
        self.entered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exit(&self) {
        self.exited.fetch_add(1, Ordering::SeqCst);
    }

    async fn render(&self) -> Result<RenderOutput, TreeError> {
        let next = self.renders.lock().await.recv().await;
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn dispatch(&self, event: LayoutEvent) -> Result<(), TreeError> {
        if event.target == "panic" {
            panic!("handler for 'panic' crashed");
        }
        if event.target == "explode" {
            return Err(TreeError::Dispatch {
                target: event.target,
                reason: "scripted failure".to_string(),
            });
        }

        let _ = self
            .dispatched
            .lock()
            .expect("dispatch recorder lock")
            .send(event);
        Ok(())
    }
}

/// Tree whose render panics. Counts exits so tests can check the scope
/// unwound.
#[derive(Default)]
pub(crate) struct PanickingTree {
    pub exited: AtomicUsize,
}

#[async_trait]
impl ComponentTree for PanickingTree {
    fn exit(&self) {
        self.exited.fetch_add(1, Ordering::SeqCst);
    }

    async fn render(&self) -> Result<RenderOutput, TreeError> {
        panic!("render exploded");
    }

    async fn dispatch(&self, _event: LayoutEvent) -> Result<(), TreeError> {
        Ok(())
    }
}

/// View session double recording ticks and pushes.
pub(crate) struct RecordingSession {
    interactive: bool,
    transport: Transport,
    pub ticks: RefCell<Vec<ViewId>>,
    pub pushes: RefCell<Vec<ReactiveModel>>,
}

impl RecordingSession {
    pub(crate) fn interactive() -> Rc<Self> {
        Rc::new(Self::build(true, Transport::Server))
    }

    pub(crate) fn static_render() -> Rc<Self> {
        Rc::new(Self::build(false, Transport::Server))
    }

    pub(crate) fn notebook() -> Rc<Self> {
        Rc::new(Self::build(false, Transport::Notebook))
    }

    fn build(interactive: bool, transport: Transport) -> Self {
        Self {
            interactive,
            transport,
            ticks: RefCell::new(Vec::new()),
            pushes: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn push_count(&self) -> usize {
        self.pushes.borrow().len()
    }

    pub(crate) fn last_push(&self) -> ReactiveModel {
        self.pushes.borrow().last().cloned().expect("at least one push")
    }
}

impl ViewSession for RecordingSession {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn schedule_next_tick(&self, view: &ViewId) {
        self.ticks.borrow_mut().push(view.clone());
    }

    fn push(&self, _view: &ViewId, model: &ReactiveModel) {
        self.pushes.borrow_mut().push(model.clone());
    }
}

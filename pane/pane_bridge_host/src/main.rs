mod counter;
mod protocol;

use crate::counter::CounterTree;
use crate::protocol::{
    ClientEnvelope, HostEnvelope, error_envelope, reader_loop, ready_envelope, writer_loop,
};
use pane_bridge_runtime::{
    BridgeConfig, BridgeError, ForegroundWaker, InboundMessage, PaneBridge, ReactiveModel,
    Transport, TreeSource, ViewId, ViewSession,
};
use std::io;
use std::process;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;

const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;

/// Everything the foreground (main) thread reacts to.
enum ForegroundEvent {
    Client(Result<ClientEnvelope, serde_json::Error>),
    Pump,
    Tick(ViewId),
    InputClosed,
}

/// A client-side view attached over stdio.
struct HostSession {
    interactive: bool,
    transport: Transport,
    outbound: SyncSender<HostEnvelope>,
    foreground: mpsc::Sender<ForegroundEvent>,
}

impl ViewSession for HostSession {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn schedule_next_tick(&self, view: &ViewId) {
        if self.foreground.send(ForegroundEvent::Tick(view.clone())).is_err() {
            tracing::warn!(view = %view, "foreground queue closed; tick dropped");
        }
    }

    fn push(&self, view: &ViewId, model: &ReactiveModel) {
        enqueue(
            &self.outbound,
            HostEnvelope::Model {
                view: view.clone(),
                model: model.clone(),
            },
        );
    }
}

fn main() {
    init_logging();

    if let Err(err) = run() {
        tracing::error!(error = %err, "pane host fatal error");
        process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("pane_bridge_host=info,pane_bridge_runtime=info")
    });

    // stdout carries protocol frames.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_thread_names(true)
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig::from_env();
    let interactive = !static_mode();
    let queue_capacity = outbound_queue_cap();

    let (outbound, outbound_rx) = mpsc::sync_channel(queue_capacity);
    let writer_handle = thread::spawn(move || writer_loop(outbound_rx));

    let (foreground, events) = mpsc::channel();
    let waker_tx = foreground.clone();
    let waker: Arc<dyn ForegroundWaker> = Arc::new(move || {
        let _ = waker_tx.send(ForegroundEvent::Pump);
    });

    let mut bridge = PaneBridge::new(
        Some(TreeSource::component(CounterTree::new)),
        config,
        waker,
    );

    outbound
        .send(ready_envelope(interactive))
        .map_err(|_| "failed to queue ready envelope")?;

    let reader_tx = foreground.clone();
    let reader_handle = thread::spawn(move || {
        let read_result = reader_loop(|envelope| {
            let _ = reader_tx.send(ForegroundEvent::Client(envelope));
        });
        if let Err(err) = &read_result {
            tracing::error!(error = %err, "reader loop terminated with error");
        }
        let _ = reader_tx.send(ForegroundEvent::InputClosed);
        read_result
    });

    tracing::info!(interactive, queue_capacity, "pane host ready");

    for event in &events {
        match event {
            ForegroundEvent::Client(Ok(envelope)) => {
                let session = HostSession {
                    interactive,
                    transport: Transport::default(),
                    outbound: outbound.clone(),
                    foreground: foreground.clone(),
                };
                handle_envelope(&mut bridge, envelope, session, &outbound);
            }
            ForegroundEvent::Client(Err(err)) => {
                tracing::warn!(error = %err, "malformed client envelope");
                enqueue(&outbound, error_envelope("invalid_envelope", err));
            }
            ForegroundEvent::Pump => {
                if let Err(err) = bridge.pump() {
                    enqueue(&outbound, error_envelope(error_code(&err), &err));
                }
            }
            ForegroundEvent::Tick(view) => {
                bridge.flush_view(&view);
            }
            ForegroundEvent::InputClosed => break,
        }
    }

    let views: Vec<ViewId> = bridge.views().cloned().collect();
    for view in &views {
        if let Err(err) = bridge.unregister(view) {
            tracing::error!(view = %view, error = %err, "teardown on exit failed");
        }
    }

    // Sessions own clones of the outbound sender; the writer stops once
    // every clone is gone.
    drop(bridge);
    drop(outbound);

    if reader_handle.is_finished() {
        match reader_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "reader thread returned error"),
            Err(err) => tracing::error!(error = ?err, "reader thread join failed"),
        }
    } else {
        tracing::warn!("reader thread still active during shutdown; skipping join");
    }

    match writer_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "writer thread returned error"),
        Err(err) => tracing::error!(error = ?err, "writer thread join failed"),
    }

    Ok(())
}

fn handle_envelope(
    bridge: &mut PaneBridge,
    envelope: ClientEnvelope,
    mut session: HostSession,
    outbound: &SyncSender<HostEnvelope>,
) {
    let result = match envelope {
        ClientEnvelope::Attach {
            view,
            parent,
            transport,
        } => {
            session.transport = transport;
            let session = Rc::new(session);
            bridge
                .register(view.clone(), parent, session.clone())
                .map(|model| session.push(&view, model))
        }
        ClientEnvelope::Detach { view } => bridge.unregister(&view),
        ClientEnvelope::Msg { view, msg } => bridge
            .on_inbound(&view, InboundMessage { msg })
            .map(|_| ()),
    };

    if let Err(err) = result {
        tracing::warn!(error = %err, "client request failed");
        enqueue(outbound, error_envelope(error_code(&err), &err));
    }
}

fn error_code(err: &BridgeError) -> &'static str {
    match err {
        BridgeError::UnknownView(_) => "unknown_view",
        BridgeError::InvalidEvent(_) => "invalid_event",
        BridgeError::NotMounted => "not_mounted",
        BridgeError::Broken { .. }
        | BridgeError::RenderLoopFailed { .. }
        | BridgeError::TaskPanicked { .. } => "broken",
        BridgeError::TeardownStalled { .. } | BridgeError::LoopPanicked { .. } => {
            "teardown_failed"
        }
        BridgeError::RuntimeStart(_) | BridgeError::LoopStartAborted => "mount_failed",
        BridgeError::Patch(_) | BridgeError::Tree(_) => "render_failed",
    }
}

/// Queues `envelope` for the writer, blocking only when the queue is full.
fn enqueue(tx: &SyncSender<HostEnvelope>, envelope: HostEnvelope) {
    match tx.try_send(envelope) {
        Ok(()) => {}
        Err(TrySendError::Full(envelope)) => {
            tracing::warn!("outbound queue full; waiting for the writer");
            if tx.send(envelope).is_err() {
                tracing::error!("writer thread gone; envelope dropped");
            }
        }
        Err(TrySendError::Disconnected(_envelope)) => {
            tracing::error!("writer thread gone; envelope dropped");
        }
    }
}

fn static_mode() -> bool {
    std::env::var("PANE_HOST_STATIC")
        .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn outbound_queue_cap() -> usize {
    std::env::var("PANE_HOST_OUTBOUND_QUEUE_CAP")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAP)
}

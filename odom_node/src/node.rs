// odom_node/src/node.rs

//! The processing thread: every sensor snapshot and service call goes through
//! one channel, so services are serialized with estimation cycles.

use crossbeam_channel::{Receiver, Sender};
use odom_core::estimation::{create_engine, EngineKind, MotionModelOdometry, OdometryEngine};
use odom_core::frames::TfBuffer;
use odom_core::messages::SensorData;
use odom_core::params::{resolve_parameters, ParameterSources};
use odom_core::tracking::{CycleOutcome, TrackingSupervisor};
use odom_core::types::pretty_print;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{NodeConfig, NodeSettings};
use crate::error::{NodeError, Result};
use crate::logging::{LogHandle, LogLevel};
use crate::publisher::ResultPublisher;
use crate::topics::TopicBus;

/// Work items handled by the processing thread.
#[derive(Debug, Clone)]
pub enum NodeRequest {
    SensorData(SensorData),
    Reset,
    ResetToPose {
        x: f64,
        y: f64,
        z: f64,
        roll: f64,
        pitch: f64,
        yaw: f64,
    },
    Pause,
    Resume,
    SetLogLevel(LogLevel),
    Shutdown,
}

/// What became of a sensor snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Tracked,
    Lost { recovered: bool },
    Aborted,
    Paused,
    /// Dropped from the queue by a reset.
    Flushed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReply {
    Cycle(CycleStatus),
    /// Result of a service call.
    Service(bool),
}

/// A request plus an optional channel for the reply.
pub struct Envelope {
    pub request: NodeRequest,
    pub reply: Option<Sender<NodeReply>>,
}

impl Envelope {
    pub fn new(request: NodeRequest) -> Self {
        Self {
            request,
            reply: None,
        }
    }

    fn into_parts(self) -> (NodeRequest, ReplyTo) {
        (self.request, ReplyTo(self.reply))
    }
}

/// Where the answer to a request goes, if anywhere.
struct ReplyTo(Option<Sender<NodeReply>>);

impl ReplyTo {
    fn send(&self, reply: NodeReply) {
        if let Some(tx) = &self.0 {
            // The caller may have given up waiting.
            let _ = tx.send(reply);
        }
    }
}

/// Counters kept by the processing thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub tracked: usize,
    pub lost: usize,
    pub aborted: usize,
    pub paused: usize,
    pub flushed: usize,
    pub recoveries: usize,
    pub services: usize,
}

pub struct OdometryNode {
    supervisor: TrackingSupervisor,
    publisher: ResultPublisher,
    tf: Arc<TfBuffer>,
    bus: Arc<Mutex<TopicBus>>,
    log: Option<LogHandle>,
    stats: NodeStats,
}

impl OdometryNode {
    pub fn new(
        supervisor: TrackingSupervisor,
        publisher: ResultPublisher,
        tf: Arc<TfBuffer>,
        bus: Arc<Mutex<TopicBus>>,
        log: Option<LogHandle>,
    ) -> Self {
        Self {
            supervisor,
            publisher,
            tf,
            bus,
            log,
            stats: NodeStats::default(),
        }
    }

    /// Builds the whole pipeline from the node configuration: parameters,
    /// engine, supervisor and output topics. Configuration problems are logged
    /// and replaced by defaults.
    pub fn from_config(
        config: &NodeConfig,
        arguments: &[(String, String)],
        tf: Arc<TfBuffer>,
        bus: Arc<Mutex<TopicBus>>,
        log: Option<LogHandle>,
        home: Option<&Path>,
        cwd: &Path,
    ) -> Self {
        let settings = config.settings(home, cwd);
        let resolved = resolve_parameters(&ParameterSources {
            modality: settings.modality,
            config_path: settings.config_path.as_deref(),
            overrides: Some(&config.parameters),
            arguments,
        });
        info!(
            "Odometry: reset_countdown        = {}",
            resolved.reset_countdown
        );

        let engine: Box<dyn OdometryEngine> = match create_engine(&resolved.engine) {
            Ok(engine) => engine,
            Err(e) => {
                error!("{}. Using the {} engine.", e, EngineKind::FrameToMap);
                Box::new(MotionModelOdometry::new(
                    EngineKind::FrameToMap,
                    &resolved.engine,
                ))
            }
        };
        info!("Odometry: engine                 = {}", engine.kind());

        Self::from_settings(&settings, engine, resolved.reset_countdown, tf, bus, log)
    }

    pub fn from_settings(
        settings: &NodeSettings,
        engine: Box<dyn OdometryEngine>,
        reset_countdown: u32,
        tf: Arc<TfBuffer>,
        bus: Arc<Mutex<TopicBus>>,
        log: Option<LogHandle>,
    ) -> Self {
        let mut supervisor =
            TrackingSupervisor::new(engine, settings.supervisor_config(reset_countdown));
        if let Some(pose) = &settings.initial_pose {
            info!("Setting odometry initial pose {}", pretty_print(pose));
            supervisor.set_initial_pose(pose);
        }
        let publisher = ResultPublisher::new(
            &settings.frames,
            settings.publish_tf,
            settings.publish_null_when_lost,
            settings.modality,
        );
        ResultPublisher::advertise(&mut bus.lock(), settings.queue_size);
        Self::new(supervisor, publisher, tf, bus, log)
    }

    pub fn supervisor(&self) -> &TrackingSupervisor {
        &self.supervisor
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Handles one request and returns its reply. `Shutdown` is answered by `run`.
    pub fn handle(&mut self, request: NodeRequest) -> NodeReply {
        match request {
            NodeRequest::SensorData(data) => NodeReply::Cycle(self.process(data)),
            NodeRequest::Reset => self.service(|s| s.reset()),
            NodeRequest::ResetToPose {
                x,
                y,
                z,
                roll,
                pitch,
                yaw,
            } => self.service(|s| s.reset_to_pose(x, y, z, roll, pitch, yaw)),
            NodeRequest::Pause => self.service(|s| s.pause()),
            NodeRequest::Resume => self.service(|s| s.resume()),
            NodeRequest::SetLogLevel(level) => {
                self.stats.services += 1;
                let ok = match &self.log {
                    Some(log) => log.set_level(level),
                    None => {
                        info!("odometry: Set log level to {}", level);
                        true
                    }
                };
                NodeReply::Service(ok)
            }
            NodeRequest::Shutdown => NodeReply::Service(true),
        }
    }

    fn service(&mut self, call: impl FnOnce(&mut TrackingSupervisor) -> bool) -> NodeReply {
        self.stats.services += 1;
        NodeReply::Service(call(&mut self.supervisor))
    }

    fn process(&mut self, data: SensorData) -> CycleStatus {
        let id = data.id;
        match self.supervisor.process_data(data, self.tf.as_ref()) {
            CycleOutcome::Paused => {
                self.stats.paused += 1;
                CycleStatus::Paused
            }
            CycleOutcome::Aborted(reason) => {
                debug!("Frame {} skipped: {}", id, reason);
                self.stats.aborted += 1;
                CycleStatus::Aborted
            }
            CycleOutcome::Processed(report) => {
                self.publisher.publish(
                    &mut self.bus.lock(),
                    &self.tf,
                    &report,
                    self.supervisor.engine(),
                );
                let recovered = report.recovery.is_some();
                if recovered {
                    self.stats.recoveries += 1;
                }
                if report.is_lost() {
                    self.stats.lost += 1;
                    CycleStatus::Lost { recovered }
                } else {
                    self.stats.tracked += 1;
                    CycleStatus::Tracked
                }
            }
        }
    }

    /// Serves requests until `Shutdown` arrives or every sender is gone.
    ///
    /// After a reset, sensor snapshots already waiting in the queue were
    /// captured against the old pose and are dropped.
    pub fn run(mut self, rx: Receiver<Envelope>) -> NodeStats {
        let mut backlog: VecDeque<Envelope> = VecDeque::new();
        loop {
            let envelope = match backlog.pop_front() {
                Some(envelope) => envelope,
                None => match rx.recv() {
                    Ok(envelope) => envelope,
                    Err(_) => break,
                },
            };

            let (request, reply) = envelope.into_parts();
            if let NodeRequest::Shutdown = request {
                reply.send(NodeReply::Service(true));
                break;
            }

            let is_reset = matches!(request, NodeRequest::Reset | NodeRequest::ResetToPose { .. });
            reply.send(self.handle(request));

            if is_reset {
                self.flush_pending(&rx, &mut backlog);
            }
        }
        info!("odometry: processing thread stopped ({:?})", self.stats);
        self.stats
    }

    fn flush_pending(&mut self, rx: &Receiver<Envelope>, backlog: &mut VecDeque<Envelope>) {
        let pending: Vec<Envelope> = backlog.drain(..).chain(rx.try_iter()).collect();
        for envelope in pending {
            if let NodeRequest::SensorData(_) = envelope.request {
                self.stats.flushed += 1;
                envelope.into_parts().1.send(NodeReply::Cycle(CycleStatus::Flushed));
            } else {
                backlog.push_back(envelope);
            }
        }
    }

    /// Moves the node onto its own processing thread.
    pub fn spawn(self) -> NodeHandle {
        let (tx, rx) = crossbeam_channel::unbounded();
        let join = std::thread::spawn(move || self.run(rx));
        NodeHandle {
            tx,
            join: Some(join),
        }
    }
}

/// The sending side of a spawned node.
pub struct NodeHandle {
    tx: Sender<Envelope>,
    join: Option<JoinHandle<NodeStats>>,
}

impl NodeHandle {
    /// Queues a request without waiting for it.
    pub fn send(&self, request: NodeRequest) -> Result<()> {
        self.tx
            .send(Envelope::new(request))
            .map_err(|_| NodeError::Disconnected)
    }

    /// Queues a request and waits for its reply.
    pub fn call(&self, request: NodeRequest) -> Result<NodeReply> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(Envelope {
                request,
                reply: Some(reply_tx),
            })
            .map_err(|_| NodeError::Disconnected)?;
        reply_rx.recv().map_err(|_| NodeError::Disconnected)
    }

    /// Stops the processing thread and returns its counters.
    pub fn shutdown(mut self) -> Result<NodeStats> {
        // The thread may already be gone; joining tells.
        let _ = self.tx.send(Envelope::new(NodeRequest::Shutdown));
        match self.join.take() {
            Some(join) => join.join().map_err(|_| NodeError::Disconnected),
            None => Err(NodeError::Disconnected),
        }
    }
}

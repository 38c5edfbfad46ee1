//! Engine driver: wires C1-C11 together, runs the resource lifecycle
//! (C10) around the radio reconnect lifecycle (C9), and exposes a
//! single command/event boundary to the surrounding system (§5, §6).
//!
//! This module is the only place that owns every other component at
//! once. Everything downstream of it (clock ticks, decode submissions,
//! mixer releases, radio reconnects) is driven from tasks spawned here;
//! [`EngineFsm`]/[`RadioFsm`] themselves stay pure and never suspend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::audio_buffer::RingAudioBuffer;
use crate::clock::SlotClock;
use crate::config::EngineConfig;
use crate::decode_pool::{prepare_task, DecodePool};
use crate::encode_pool::EncodePool;
use crate::engine_fsm::{EngineFsm, ResourceGraph, ResourceKind};
use crate::errors::{EngineError, LifecycleError, Result};
use crate::events::{ClockEvent, EngineCommand, EngineEvent, EngineFsmEvent, EngineFsmState, RadioFsmEvent};
use crate::interfaces::{AudioSink, AudioSource, Decoder, Encoder, RadioActuator};
use crate::logging::{EngineLogger, LogConfig};
use crate::mixer::AudioMixer;
use crate::operator_manager::OperatorManager;
use crate::radio_fsm::{RadioFsm, RadioFsmEffect};
use crate::slot::{Phase, Slot};
use crate::slot_pack::SlotPackAggregator;
use crate::spectrum::SpectrumScheduler;

const CAPTURE_POLL_MS: u64 = 20;
const SEAL_SWEEP_MS: u64 = 1_000;
/// Per-resource stop/rollback timeout (§4.10/§5 "default 10s").
const RESOURCE_STOP_TIMEOUT_MS: u64 = 10_000;

/// Owns every C1-C11 component for one running engine instance. Built
/// only through [`Engine::spawn`]; callers interact with the returned
/// [`EngineHandle`].
pub struct Engine {
    buffer: Arc<RingAudioBuffer>,
    clock: Arc<SlotClock>,
    decode_pool: Arc<DecodePool>,
    encode_pool: Arc<EncodePool>,
    aggregator: Arc<SlotPackAggregator>,
    mixer: Arc<AudioMixer>,
    operators: Arc<OperatorManager>,
    radio_actuator: Arc<SyncMutex<Box<dyn RadioActuator>>>,
    audio_source: Arc<AsyncMutex<Box<dyn AudioSource>>>,
    audio_sink: Arc<AsyncMutex<Box<dyn AudioSink>>>,
    logger: Arc<SyncMutex<EngineLogger>>,
    radio_fsm: Arc<SyncMutex<RadioFsm>>,
}

/// The outward handle returned by [`Engine::spawn`]: a command sender,
/// an event receiver, and the join handle for the engine's own task
/// tree (§6).
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    supervisor: JoinHandle<()>,
}

impl EngineHandle {
    pub async fn send_command(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::Lifecycle(LifecycleError::InvalidState("engine stopped".to_string())))
    }

    pub async fn recv_event(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    /// Requests a graceful stop and waits for the supervisor task to
    /// finish shutting down every component.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.command_tx.send(EngineCommand::StopEngine).await;
        drop(self.command_tx);
        let _ = self.supervisor.await;
        Ok(())
    }
}

impl Engine {
    /// Builds and starts every C1-C11 component, rolling back whatever
    /// was already brought up if any *required* resource fails to start
    /// (§4.10, scenario 5). The returned handle is live: the engine is
    /// already in the `Running` state by the time this returns.
    pub async fn spawn(
        config: EngineConfig,
        decoder: Arc<dyn Decoder>,
        encoder: Arc<dyn Encoder>,
        audio_source: Box<dyn AudioSource>,
        audio_sink: Box<dyn AudioSink>,
        radio_actuator: Box<dyn RadioActuator>,
    ) -> Result<EngineHandle> {
        config.validate()?;

        let mode = config.mode.clone();
        let horizon_ms = 2 * mode.slot_ms
            + mode
                .window_offsets_ms
                .iter()
                .map(|o| o.unsigned_abs())
                .max()
                .unwrap_or(0) as i64;

        let buffer = Arc::new(RingAudioBuffer::new(config.audio_capture.sample_rate, horizon_ms));
        let decode_pool = Arc::new(DecodePool::new(&config.decode_pool, decoder)?);
        let encode_pool = Arc::new(EncodePool::new(&config.encode_pool, encoder)?);
        let aggregator = Arc::new(SlotPackAggregator::new(
            mode.clone(),
            config.slot_pack_retention.count,
        ));
        let mixer = Arc::new(AudioMixer::new(config.mixer.clone()));
        let operators = Arc::new(OperatorManager::new(
            &config.operators,
            Arc::clone(&encode_pool),
            Arc::clone(&mixer),
            mode.clone(),
        ));

        let transmit_phase_sets: Vec<std::collections::HashSet<Phase>> =
            config.operators.iter().map(|o| o.transmit_phase_set()).collect();
        let clock = Arc::new(SlotClock::with_transmit_gate(mode.clone(), move |slot: &Slot| {
            let phase = slot.phase();
            transmit_phase_sets.iter().any(|set| set.contains(&phase))
        }));

        let logger = Arc::new(SyncMutex::new(EngineLogger::new(LogConfig::default())));
        let radio_fsm = Arc::new(SyncMutex::new(RadioFsm::new(config.reconnect.clone())));
        let radio_actuator = Arc::new(SyncMutex::new(radio_actuator));
        let audio_source = Arc::new(AsyncMutex::new(audio_source));
        let audio_sink = Arc::new(AsyncMutex::new(audio_sink));

        let engine = Engine {
            buffer,
            clock,
            decode_pool,
            encode_pool,
            aggregator,
            mixer,
            operators,
            radio_actuator,
            audio_source,
            audio_sink,
            logger,
            radio_fsm,
        };

        engine.start().await
    }

    fn resource_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph.register("buffer", &[], ResourceKind::Required);
        graph.register("clock", &["buffer"], ResourceKind::Required);
        graph.register("decode_pool", &["clock"], ResourceKind::Required);
        graph.register("aggregator", &["decode_pool"], ResourceKind::Required);
        graph.register("encode_pool", &[], ResourceKind::Required);
        graph.register("operator_manager", &["encode_pool"], ResourceKind::Required);
        graph.register("mixer", &["operator_manager"], ResourceKind::Required);
        graph.register("radio", &["mixer"], ResourceKind::Required);
        graph.register("spectrum", &["buffer"], ResourceKind::Optional);
        graph
    }

    async fn start(self) -> Result<EngineHandle> {
        let graph = Self::resource_graph();
        let mut fsm = EngineFsm::new();
        fsm.apply(EngineFsmEvent::Start)
            .map_err(EngineError::Lifecycle)?;

        let mut started: Vec<String> = Vec::new();
        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();
        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(512);
        let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(64);

        let order = graph.start_order().map_err(EngineError::Lifecycle)?;
        for name in &order {
            match self.start_resource(name, &event_tx, &mut tasks).await {
                Ok(()) => {
                    started.push(name.clone());
                    fsm.apply(EngineFsmEvent::ResourceStarted(name.clone()))
                        .map_err(EngineError::Lifecycle)?;
                }
                Err(err) => {
                    let kind = graph.kind_of(name);
                    if kind == Some(ResourceKind::Optional) {
                        self.logger.lock().warn(
                            "LIFECYCLE",
                            format!("optional resource {name} failed to start: {err}"),
                        );
                        started.push(name.clone());
                        continue;
                    }
                    // Roll back whatever already started, in reverse
                    // order, bounding each resource's teardown so a
                    // wedged task can't hang the rollback forever
                    // (§4.10/§5).
                    let mut by_resource: Vec<(String, Vec<JoinHandle<()>>)> = Vec::new();
                    for (resource_name, handle) in tasks.drain(..) {
                        match by_resource.iter_mut().find(|(n, _)| *n == resource_name) {
                            Some((_, handles)) => handles.push(handle),
                            None => by_resource.push((resource_name, vec![handle])),
                        }
                    }
                    for (resource_name, handles) in by_resource.into_iter().rev() {
                        if !stop_resource_within_timeout(
                            handles,
                            RESOURCE_STOP_TIMEOUT_MS,
                        )
                        .await
                        {
                            self.logger.lock().warn(
                                "LIFECYCLE",
                                format!("resource {resource_name} did not stop within {RESOURCE_STOP_TIMEOUT_MS} ms during rollback"),
                            );
                        }
                    }
                    let lifecycle_err = LifecycleError::StartFailed(name.clone(), err.to_string());
                    let _ = fsm.apply(EngineFsmEvent::ResourceFailed(name.clone(), lifecycle_err.clone()));
                    return Err(EngineError::Lifecycle(lifecycle_err));
                }
            }
        }

        fsm.mark_running();
        let fsm_state = Arc::new(SyncMutex::new(fsm));
        let _ = event_tx
            .send(EngineEvent::SystemStatus {
                engine_state: EngineFsmState::Running,
            })
            .await;

        let supervisor = self.spawn_supervisor(command_rx, event_tx, tasks, fsm_state);

        Ok(EngineHandle {
            command_tx,
            event_rx,
            supervisor,
        })
    }

    /// Brings up a single named resource. Clock, decode loop, encode
    /// dispatch, spectrum feed, and the radio connect attempt are each
    /// spawned as their own task; anything that can fail synchronously
    /// (right now only the radio's first connect attempt) is probed
    /// inline so startup failure can roll back cleanly.
    async fn start_resource(
        &self,
        name: &str,
        event_tx: &mpsc::Sender<EngineEvent>,
        tasks: &mut Vec<(String, JoinHandle<()>)>,
    ) -> Result<()> {
        match name {
            "buffer" => {
                tasks.push((name.to_string(), self.spawn_capture_loop()));
                Ok(())
            }
            "clock" => {
                tasks.push((name.to_string(), self.spawn_clock_run()));
                tasks.push((name.to_string(), self.spawn_clock_subscriber(event_tx.clone())));
                tasks.push((name.to_string(), self.spawn_seal_sweep()));
                Ok(())
            }
            "decode_pool" | "aggregator" | "encode_pool" | "operator_manager" | "mixer" => Ok(()),
            "radio" => {
                let probe = {
                    let mut radio = self.radio_actuator.lock();
                    radio.get_frequency()
                };
                match probe {
                    Ok(_) => {
                        self.radio_fsm.lock().apply(RadioFsmEvent::Connect);
                        self.radio_fsm.lock().apply(RadioFsmEvent::ConnectSuccess);
                        tasks.push((name.to_string(), self.spawn_radio_driver(event_tx.clone())));
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            "spectrum" => {
                tasks.push((name.to_string(), self.spawn_spectrum(event_tx.clone())));
                Ok(())
            }
            other => Err(EngineError::Lifecycle(LifecycleError::UnknownResource(
                other.to_string(),
            ))),
        }
    }

    fn spawn_capture_loop(&self) -> JoinHandle<()> {
        let buffer = Arc::clone(&self.buffer);
        let source = Arc::clone(&self.audio_source);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(CAPTURE_POLL_MS));
            loop {
                ticker.tick().await;
                let block = source.lock().await.poll();
                if !block.samples.is_empty() {
                    buffer.write(&block.samples);
                }
            }
        })
    }

    fn spawn_clock_run(&self) -> JoinHandle<()> {
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move { clock.run().await })
    }

    fn spawn_seal_sweep(&self) -> JoinHandle<()> {
        let aggregator = Arc::clone(&self.aggregator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(SEAL_SWEEP_MS));
            loop {
                ticker.tick().await;
                aggregator.seal_expired(Utc::now());
            }
        })
    }

    fn spawn_clock_subscriber(&self, event_tx: mpsc::Sender<EngineEvent>) -> JoinHandle<()> {
        let mut rx = self.clock.subscribe();
        let buffer = Arc::clone(&self.buffer);
        let decode_pool = Arc::clone(&self.decode_pool);
        let aggregator = Arc::clone(&self.aggregator);
        let operators = Arc::clone(&self.operators);
        let mixer = Arc::clone(&self.mixer);
        let radio_actuator = Arc::clone(&self.radio_actuator);
        let radio_fsm = Arc::clone(&self.radio_fsm);
        let audio_sink = Arc::clone(&self.audio_sink);
        let logger = Arc::clone(&self.logger);
        let mode = self.clock.mode().clone();

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                match event {
                    ClockEvent::SlotStart(slot) => {
                        operators.on_slot_start(&slot);
                        aggregator.seal_expired(Utc::now());
                        let _ = event_tx
                            .send(EngineEvent::SlotStart {
                                slot_id: slot.id.clone(),
                                start_ms: slot.start_ms,
                            })
                            .await;
                    }
                    ClockEvent::SubWindow {
                        slot,
                        window_idx,
                        capture_start_ms,
                    } => {
                        let task = prepare_task(
                            &buffer,
                            &slot.id,
                            window_idx,
                            capture_start_ms,
                            slot.slot_ms,
                        );
                        match task {
                            Ok(task) => {
                                let decode_pool = Arc::clone(&decode_pool);
                                let aggregator = Arc::clone(&aggregator);
                                let operators = Arc::clone(&operators);
                                let event_tx = event_tx.clone();
                                let mode = mode.clone();
                                let slot_id = slot.id.clone();
                                let slot_end_ms = slot.end_ms;
                                tokio::spawn(async move {
                                    match decode_pool.submit(task, &mode).await {
                                        Ok(result) => {
                                            if let Ok((updated, sealed)) = aggregator.merge(
                                                &result.slot_id,
                                                slot_end_ms,
                                                result.window_idx,
                                                result.frames.clone(),
                                                Utc::now(),
                                            ) {
                                                if let crate::events::AggregatorEvent::SlotPackUpdated(pack) = &updated {
                                                    let _ = event_tx
                                                        .send(EngineEvent::SlotPackUpdated {
                                                            slot_id: pack.slot_id.clone(),
                                                            total_decodes: pack.stats.total_decodes,
                                                        })
                                                        .await;
                                                }
                                                let _ = sealed;
                                            }
                                            for frame in &result.frames {
                                                operators.dispatch_rx(&frame.message, frame.snr_db);
                                            }
                                        }
                                        Err(err) => {
                                            let _ = event_tx
                                                .send(EngineEvent::DecodeError {
                                                    slot_id,
                                                    window_idx,
                                                    message: err.to_string(),
                                                })
                                                .await;
                                        }
                                    }
                                });
                            }
                            Err(err) => {
                                logger.lock().warn("DECODE_POOL", format!("prepare_task failed: {err}"));
                            }
                        }
                    }
                    ClockEvent::EncodeStart(slot) => {
                        let results = operators.on_encode_start(&slot).await;
                        for (operator_id, outcome) in results {
                            if let Err(err) = outcome {
                                logger
                                    .lock()
                                    .warn("ENCODE_POOL", format!("encode failed for {operator_id}: {err}"));
                            } else {
                                let _ = event_tx
                                    .send(EngineEvent::TransmissionLog {
                                        operator_id,
                                        slot_id: slot.id.clone(),
                                        text: String::new(),
                                    })
                                    .await;
                            }
                        }
                    }
                    ClockEvent::TransmitStart(slot) => {
                        let mixer = Arc::clone(&mixer);
                        let radio_actuator = Arc::clone(&radio_actuator);
                        let radio_fsm = Arc::clone(&radio_fsm);
                        let audio_sink = Arc::clone(&audio_sink);
                        let event_tx = event_tx.clone();
                        tokio::spawn(async move {
                            play_mixed_slot(slot, mixer, radio_actuator, radio_fsm, audio_sink, event_tx).await;
                        });
                    }
                }
            }
        })
    }

    fn spawn_radio_driver(&self, event_tx: mpsc::Sender<EngineEvent>) -> JoinHandle<()> {
        let radio_fsm = Arc::clone(&self.radio_fsm);
        let radio_actuator = Arc::clone(&self.radio_actuator);
        let logger = Arc::clone(&self.logger);
        let health_check_interval_ms = {
            // Captured once at startup; the reconnect config does not
            // change for the lifetime of a running engine.
            radio_fsm.lock().health_check_interval_ms()
        };
        tokio::spawn(async move {
            let (effect_tx, mut effect_rx) = mpsc::unbounded_channel::<RadioFsmEffect>();
            let mut health_ticker =
                tokio::time::interval(std::time::Duration::from_millis(health_check_interval_ms));
            loop {
                tokio::select! {
                    _ = health_ticker.tick() => {
                        let connected = radio_fsm.lock().can_assert_ptt();
                        if connected {
                            let probe = radio_actuator.lock().get_frequency();
                            if let Err(err) = probe {
                                let radio_err = match err {
                                    crate::errors::EngineError::Radio(e) => e,
                                    _ => crate::errors::RadioError::Timeout,
                                };
                                let effects = radio_fsm.lock().apply(RadioFsmEvent::HealthCheckFailed(radio_err));
                                for eff in effects {
                                    let _ = effect_tx.send(eff);
                                }
                                let state = radio_fsm.lock().state();
                                let _ = event_tx.send(EngineEvent::RadioStatusChanged { state }).await;
                            }
                        }
                    }
                    Some(effect) = effect_rx.recv() => {
                        match effect {
                            RadioFsmEffect::AttemptConnect => {
                                let probe = radio_actuator.lock().get_frequency();
                                let next = {
                                    let mut fsm = radio_fsm.lock();
                                    match probe {
                                        Ok(_) => fsm.apply(RadioFsmEvent::ConnectSuccess),
                                        Err(crate::errors::EngineError::Radio(e)) => {
                                            fsm.apply(RadioFsmEvent::ConnectFailure(e))
                                        }
                                        Err(_) => fsm.apply(RadioFsmEvent::ConnectFailure(
                                            crate::errors::RadioError::Timeout,
                                        )),
                                    }
                                };
                                for eff in next {
                                    let _ = effect_tx.send(eff);
                                }
                                let state = radio_fsm.lock().state();
                                let _ = event_tx.send(EngineEvent::RadioStatusChanged { state }).await;
                            }
                            RadioFsmEffect::ScheduleReconnect { delay_ms, attempt } => {
                                logger.lock().info(
                                    "RADIO",
                                    format!("scheduling reconnect attempt {attempt} in {delay_ms} ms"),
                                );
                                let tx = effect_tx.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                                    let _ = tx.send(RadioFsmEffect::AttemptConnect);
                                });
                            }
                            RadioFsmEffect::ReconnectExhausted => {
                                logger.lock().error("RADIO", "reconnect attempts exhausted");
                                let state = radio_fsm.lock().state();
                                let _ = event_tx.send(EngineEvent::RadioStatusChanged { state }).await;
                            }
                        }
                    }
                    else => break,
                }
            }
        })
    }

    fn spawn_spectrum(&self, event_tx: mpsc::Sender<EngineEvent>) -> JoinHandle<()> {
        let scheduler = SpectrumScheduler::new(Arc::clone(&self.buffer), event_tx);
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Drives the command loop and the shutdown sequence. Runs until
    /// the command channel closes or a `StopEngine` is processed.
    fn spawn_supervisor(
        &self,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        event_tx: mpsc::Sender<EngineEvent>,
        tasks: Vec<(String, JoinHandle<()>)>,
        fsm: Arc<SyncMutex<EngineFsm>>,
    ) -> JoinHandle<()> {
        let operators = Arc::clone(&self.operators);
        let mixer = Arc::clone(&self.mixer);
        let radio_fsm = Arc::clone(&self.radio_fsm);
        let logger = Arc::clone(&self.logger);

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    EngineCommand::StopEngine => break,
                    EngineCommand::GetStatus => {
                        let engine_state = fsm.lock().state();
                        let _ = event_tx.send(EngineEvent::SystemStatus { engine_state }).await;
                        let state = radio_fsm.lock().state();
                        let _ = event_tx.send(EngineEvent::RadioStatusChanged { state }).await;
                    }
                    EngineCommand::StartOperator { id } => {
                        let events = operators.start_cq(&id);
                        for ev in events {
                            if let crate::events::OperatorEvent::StateChanged { operator_id, state } = ev {
                                let _ = event_tx
                                    .send(EngineEvent::OperatorStatusUpdate {
                                        operator_id,
                                        state,
                                    })
                                    .await;
                            }
                        }
                    }
                    EngineCommand::StopOperator { id } => {
                        let events = operators.reset(&id);
                        for ev in events {
                            if let crate::events::OperatorEvent::StateChanged { operator_id, state } = ev {
                                let _ = event_tx
                                    .send(EngineEvent::OperatorStatusUpdate {
                                        operator_id,
                                        state,
                                    })
                                    .await;
                            }
                        }
                    }
                    EngineCommand::SetOperatorSlot { id, slot_key } => {
                        let (enabled, key) = match slot_key.strip_prefix('-') {
                            Some(rest) => (false, rest),
                            None => (true, slot_key.as_str()),
                        };
                        let phase = match key.to_ascii_lowercase().as_str() {
                            "odd" => Some(Phase::Odd),
                            "even" => Some(Phase::Even),
                            _ => None,
                        };
                        if let Some(phase) = phase {
                            operators.set_transmit_phase(&id, phase, enabled);
                        } else {
                            logger.lock().warn("LIFECYCLE", format!("unknown slot key '{slot_key}'"));
                        }
                    }
                    EngineCommand::OperatorRequestCall { id, callsign } => {
                        operators.request_call(&id, &callsign);
                    }
                    EngineCommand::SetVolumeGain { gain } => {
                        for operator_id in operators.operator_ids() {
                            if let Err(err) = mixer.set_gain(&operator_id, gain) {
                                logger.lock().warn("MIXER", format!("set gain failed for {operator_id}: {err}"));
                            }
                        }
                    }
                    EngineCommand::SetMode { .. }
                    | EngineCommand::SetOperatorContext { .. }
                    | EngineCommand::SetClientEnabledOperators { .. }
                    | EngineCommand::ForceStopTransmission
                    | EngineCommand::StartEngine => {
                        logger.lock().warn(
                            "LIFECYCLE",
                            format!("{command:?} requires an engine restart and is not applied live"),
                        );
                    }
                }
            }

            {
                let mut f = fsm.lock();
                let _ = f.apply(EngineFsmEvent::Stop);
            }

            // Stop resources in dependency-reverse order, bounding each
            // one's teardown so a wedged task can't hang the whole
            // sequence forever (§4.10/§5 "per-resource stop timeout,
            // default 10s").
            let mut by_resource: HashMap<String, Vec<JoinHandle<()>>> = HashMap::new();
            for (name, task) in tasks {
                by_resource.entry(name).or_default().push(task);
            }
            let mut timed_out = false;
            for name in Self::resource_graph().stop_order().unwrap_or_default() {
                let Some(handles) = by_resource.remove(&name) else {
                    continue;
                };
                let stopped_cleanly =
                    stop_resource_within_timeout(handles, RESOURCE_STOP_TIMEOUT_MS).await;
                let mut f = fsm.lock();
                if stopped_cleanly {
                    let _ = f.apply(EngineFsmEvent::ResourceStopped(name));
                } else {
                    logger.lock().warn(
                        "LIFECYCLE",
                        format!("resource {name} did not stop within {RESOURCE_STOP_TIMEOUT_MS} ms"),
                    );
                    let _ = f.apply(EngineFsmEvent::ResourceStopTimedOut(name, RESOURCE_STOP_TIMEOUT_MS));
                    timed_out = true;
                    break;
                }
            }
            if !timed_out {
                fsm.lock().mark_idle();
            }
            let _ = event_tx
                .send(EngineEvent::SystemStatus {
                    engine_state: fsm.lock().state(),
                })
                .await;
        })
    }
}

/// Aborts every handle belonging to one resource and waits up to
/// `timeout_ms` for it to actually unwind; a task stuck past a
/// blocking `.await` past its abort point is reported as not stopped
/// cleanly rather than left to hang the caller (§4.10/§5).
async fn stop_resource_within_timeout(handles: Vec<JoinHandle<()>>, timeout_ms: u64) -> bool {
    for handle in &handles {
        handle.abort();
    }
    let mut clean = true;
    for handle in handles {
        if tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), handle)
            .await
            .is_err()
        {
            clean = false;
        }
    }
    clean
}

/// Polls the mixer until a slot releases or is discarded, then keys
/// PTT and plays the mixed waveform (§4.6/§4.9 handoff).
async fn play_mixed_slot(
    slot: Slot,
    mixer: Arc<AudioMixer>,
    radio_actuator: Arc<SyncMutex<Box<dyn RadioActuator>>>,
    radio_fsm: Arc<SyncMutex<RadioFsm>>,
    audio_sink: Arc<AsyncMutex<Box<dyn AudioSink>>>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(10));
    let output = loop {
        ticker.tick().await;
        match mixer.poll_release(&slot.id, Utc::now()) {
            Ok(Some(output)) => break Some(output),
            Ok(None) => continue,
            Err(_) => break None,
        }
    };

    let Some(output) = output else {
        mixer.forget_slot(&slot.id);
        return;
    };

    if !radio_fsm.lock().can_assert_ptt() {
        return;
    }

    if radio_actuator.lock().set_ptt(true).is_err() {
        return;
    }
    let _ = event_tx.send(EngineEvent::PttStatusChanged { on: true }).await;

    let handle = audio_sink
        .lock()
        .await
        .play(&output.pcm, output.sample_rate, None);

    if let Ok(handle) = handle {
        let now = Utc::now();
        if handle.expected_end_at > now {
            let wait = (handle.expected_end_at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
    }

    let _ = radio_actuator.lock().set_ptt(false);
    let _ = event_tx.send(EngineEvent::PttStatusChanged { on: false }).await;
    mixer.forget_slot(&slot.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ToneKeyedCodec;
    use crate::device::NullRadio;
    use crate::interfaces::{AudioBlock, PlaybackHandle};
    use chrono::DateTime;

    struct SilentSource;
    impl AudioSource for SilentSource {
        fn poll(&mut self) -> AudioBlock {
            AudioBlock {
                samples: vec![0.0; 240],
                sample_rate: 48_000,
                captured_at: Utc::now(),
                missing_samples: 0,
            }
        }
    }

    struct NullSink;
    impl AudioSink for NullSink {
        fn play(
            &mut self,
            pcm: &[f32],
            sample_rate: u32,
            _start_at: Option<DateTime<Utc>>,
        ) -> Result<PlaybackHandle> {
            let now = Utc::now();
            let duration_ms = (pcm.len() as i64 * 1000) / sample_rate.max(1) as i64;
            Ok(PlaybackHandle {
                started_at: now,
                expected_end_at: now + chrono::Duration::milliseconds(duration_ms),
            })
        }
    }

    #[tokio::test]
    async fn spawn_starts_and_reports_running_then_stops() {
        let mut config = EngineConfig::default();
        config.operators.clear();

        let codec = Arc::new(ToneKeyedCodec::new());
        let mut handle = Engine::spawn(
            config,
            codec.clone(),
            codec,
            Box::new(SilentSource),
            Box::new(NullSink),
            Box::new(NullRadio::new()),
        )
        .await
        .unwrap();

        let mut saw_running = false;
        for _ in 0..5 {
            if let Ok(Some(EngineEvent::SystemStatus { engine_state })) =
                tokio::time::timeout(std::time::Duration::from_millis(200), handle.recv_event()).await
            {
                if matches!(engine_state, EngineFsmState::Running) {
                    saw_running = true;
                    break;
                }
            }
        }
        assert!(saw_running);

        handle.shutdown().await.unwrap();
    }
}

//! Thread orchestrator: owns the Machine/Mixer/Capture
//! worker threads, their command queues and Pacers, and the rendezvous
//! primitive used for config-change barriers and savestate checkpoints.
//!
//! Each worker is a named `thread::Builder` thread draining its own
//! `crossbeam_channel` command queue in a step loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::audio::{AudioSpec, Mixer};
use crate::capture::encoders::VideoCodec;
use crate::capture::CaptureController;
use crate::chrono::Pacer;
use crate::queue::{CommandQueue, CommandSender};
use crate::scheduler::Scheduler;

/// Cycles an external CPU collaborator reports having actually executed.
/// The trait lets this core stay CPU-agnostic while still driving a deterministic step
/// loop in its own tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclesConsumed(pub u64);

/// External collaborator for instruction execution. Implementations decide internally how `cycles` maps to
/// instructions; the step loop only cares how many were actually consumed.
pub trait CpuCollaborator: Send {
    fn run_for(&mut self, cycles: u64) -> CyclesConsumed;
}

/// Deterministic stand-in used by this core's own tests and the S1-S6
/// scenario harnesses: always consumes exactly the requested budget.
pub struct NullCpu;

impl CpuCollaborator for NullCpu {
    fn run_for(&mut self, cycles: u64) -> CyclesConsumed {
        CyclesConsumed(cycles)
    }
}

/// Soft bounds on the cycles factor: below the floor the machine
/// pauses instead of crawling; above the ceiling it saturates.
pub const CYCLES_FACTOR_MIN: f64 = 0.00002;
pub const CYCLES_FACTOR_MAX: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum FactorState {
    Paused,
    Running(f64),
}

fn resolve_cycles_factor(requested: f64) -> FactorState {
    if requested < CYCLES_FACTOR_MIN {
        FactorState::Paused
    } else {
        FactorState::Running(requested.min(CYCLES_FACTOR_MAX))
    }
}

pub struct MachineConfig {
    pub heartbeat_ns: u64,
    pub cycle_ns_per_instruction: f64,
    pub cycles_factor: f64,
}

/// Reusable rendezvous barrier: the issuer arms a count of
/// outstanding workers, each worker `arrive()`s after running its local
/// handler, and the issuer blocks in `wait()` until the count reaches zero.
/// The same instance serves config-change barriers and savestate
/// pause/resume checkpoints — they never run concurrently with each other.
pub struct Rendezvous {
    remaining: Mutex<usize>,
    cv: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Rendezvous { remaining: Mutex::new(0), cv: Condvar::new() }
    }

    pub fn arm(&self, workers: usize) {
        *self.remaining.lock().unwrap() = workers;
    }

    pub fn arrive(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
        }
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining > 0 {
            remaining = self.cv.wait(remaining).unwrap();
        }
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerHandle {
    sender: CommandSender,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    fn join(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct OrchestratorConfig {
    pub machine: MachineConfig,
    pub mixer_output_spec: AudioSpec,
    pub mixer_prebuffer_us: u64,
    pub mixer_ring_capacity_frames: usize,
    pub capture_queue_capacity: usize,
    pub capture_dir: PathBuf,
    pub capture_codec: VideoCodec,
    pub capture_quality: u32,
    pub command_queue_capacity: usize,
}

/// Owns the three worker threads plus the shared rendezvous/shutdown
/// signaling. Each worker has its own `CommandQueue`/`Pacer`;
/// all Pacers are calibrated from the Machine's at construction time so
/// heartbeats stay phase-aligned.
pub struct Orchestrator {
    machine: WorkerHandle,
    mixer: WorkerHandle,
    capture: WorkerHandle,
    rendezvous: Arc<Rendezvous>,
    shutdown_flag: Arc<AtomicBool>,
    cycles_factor: Arc<Mutex<f64>>,
}

impl Orchestrator {
    pub fn new(cfg: OrchestratorConfig, cpu: Box<dyn CpuCollaborator>) -> Self {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let rendezvous = Arc::new(Rendezvous::new());
        let cycles_factor = Arc::new(Mutex::new(cfg.machine.cycles_factor));

        let machine_pacer = Pacer::new(cfg.machine.heartbeat_ns);
        let machine_phase = machine_pacer.clone();

        let machine_queue = Arc::new(CommandQueue::new(cfg.command_queue_capacity));
        let mixer_queue = Arc::new(CommandQueue::new(cfg.command_queue_capacity));
        let capture_queue = Arc::new(CommandQueue::new(cfg.command_queue_capacity));

        let machine = spawn_machine(
            "machine",
            Arc::clone(&machine_queue),
            machine_pacer,
            cpu,
            cfg.machine.heartbeat_ns,
            cfg.machine.cycle_ns_per_instruction,
            Arc::clone(&cycles_factor),
            Arc::clone(&shutdown_flag),
        );

        let mut mixer_pacer = Pacer::new(cfg.machine.heartbeat_ns);
        mixer_pacer.calibrate(&machine_phase);
        let mixer_core =
            Mixer::new(cfg.mixer_output_spec, cfg.machine.heartbeat_ns, cfg.mixer_prebuffer_us, cfg.mixer_ring_capacity_frames);
        let mixer = spawn_mixer("mixer", Arc::clone(&mixer_queue), mixer_pacer, mixer_core, Arc::clone(&shutdown_flag));

        let mut capture_pacer = Pacer::new(cfg.machine.heartbeat_ns);
        capture_pacer.calibrate(&machine_phase);
        let capture_core = CaptureController::new(
            cfg.capture_queue_capacity,
            cfg.capture_dir,
            cfg.capture_codec,
            cfg.capture_quality,
        );
        let capture = spawn_capture(
            "capture",
            Arc::clone(&capture_queue),
            capture_pacer,
            capture_core,
            cfg.machine.heartbeat_ns,
            Arc::clone(&shutdown_flag),
        );

        Orchestrator { machine, mixer, capture, rendezvous, shutdown_flag, cycles_factor }
    }

    pub fn machine_commands(&self) -> CommandSender {
        self.machine.sender.clone()
    }

    pub fn mixer_commands(&self) -> CommandSender {
        self.mixer.sender.clone()
    }

    pub fn capture_commands(&self) -> CommandSender {
        self.capture.sender.clone()
    }

    /// Posts a `cycles_adjust(k)` command to the Machine thread.
    pub fn cycles_adjust(&self, factor: f64) -> crate::error::CoreResult<()> {
        let shared = Arc::clone(&self.cycles_factor);
        self.machine.sender.push(move || {
            *shared.lock().unwrap() = factor;
        })
    }

    /// Runs the three-worker rendezvous pattern shared by config-change
    /// barriers and savestate checkpoints: each handler is
    /// posted to its worker, and this call blocks until all three have run.
    pub fn barrier(
        &self,
        on_machine: impl FnOnce() + Send + 'static,
        on_mixer: impl FnOnce() + Send + 'static,
        on_capture: impl FnOnce() + Send + 'static,
    ) {
        self.rendezvous.arm(3);
        let rv = Arc::clone(&self.rendezvous);
        let _ = self.machine.sender.push(move || {
            on_machine();
            rv.arrive();
        });
        let rv = Arc::clone(&self.rendezvous);
        let _ = self.mixer.sender.push(move || {
            on_mixer();
            rv.arrive();
        });
        let rv = Arc::clone(&self.rendezvous);
        let _ = self.capture.sender.push(move || {
            on_capture();
            rv.arrive();
        });
        self.rendezvous.wait();
    }

    /// Config-change barrier: `on_*` should re-read config under
    /// the rendezvous, retaining the previous value on any rejected key.
    pub fn config_changed(
        &self,
        on_machine: impl FnOnce() + Send + 'static,
        on_mixer: impl FnOnce() + Send + 'static,
        on_capture: impl FnOnce() + Send + 'static,
    ) {
        self.barrier(on_machine, on_mixer, on_capture);
    }

    /// Savestate pause/resume rendezvous: same barrier, different handlers.
    pub fn pause_for_savestate(
        &self,
        on_machine: impl FnOnce() + Send + 'static,
        on_mixer: impl FnOnce() + Send + 'static,
        on_capture: impl FnOnce() + Send + 'static,
    ) {
        self.barrier(on_machine, on_mixer, on_capture);
    }

    /// Flips the shared shutdown flag and joins all three worker threads
    ///: the capture thread flushes its AVI index
    /// before exiting, the mixer lets the ring drain naturally on its way out.
    pub fn shutdown(mut self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.machine.join();
        self.mixer.join();
        self.capture.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_machine(
    name: &'static str,
    queue: Arc<CommandQueue>,
    mut pacer: Pacer,
    mut cpu: Box<dyn CpuCollaborator>,
    heartbeat_ns: u64,
    cycle_ns_per_instruction: f64,
    cycles_factor: Arc<Mutex<f64>>,
    shutdown: Arc<AtomicBool>,
) -> WorkerHandle {
    let sender = queue.sender();
    let join = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut scheduler = Scheduler::new();
            loop {
                for cmd in queue.try_and_pop_all() {
                    cmd();
                }
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let factor = *cycles_factor.lock().unwrap();
                if let FactorState::Running(factor) = resolve_cycles_factor(factor) {
                    let cycles_this_step =
                        ((heartbeat_ns as f64 * factor) / cycle_ns_per_instruction).round().max(0.0) as u64;
                    cpu.run_for(cycles_this_step);
                    scheduler.advance(heartbeat_ns);
                }
                pacer.wait();
            }
        })
        .expect("spawn machine thread");
    WorkerHandle { sender, join: Some(join) }
}

fn spawn_mixer(
    name: &'static str,
    queue: Arc<CommandQueue>,
    mut pacer: Pacer,
    mut mixer: Mixer,
    shutdown: Arc<AtomicBool>,
) -> WorkerHandle {
    let sender = queue.sender();
    let join = thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let chrono = crate::chrono::Chrono::new();
            loop {
                for cmd in queue.try_and_pop_all() {
                    cmd();
                }
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                mixer.step(chrono.now_ns(), false);
                pacer.wait();
            }
        })
        .expect("spawn mixer thread");
    WorkerHandle { sender, join: Some(join) }
}

fn spawn_capture(
    name: &'static str,
    queue: Arc<CommandQueue>,
    mut pacer: Pacer,
    mut controller: CaptureController,
    heartbeat_ns: u64,
    shutdown: Arc<AtomicBool>,
) -> WorkerHandle {
    let sender = queue.sender();
    let timeout = Duration::from_nanos(heartbeat_ns.saturating_mul(2));
    let join = thread::Builder::new()
        .name(name.into())
        .spawn(move || loop {
            for cmd in queue.try_and_pop_all() {
                cmd();
            }
            if shutdown.load(Ordering::Relaxed) {
                let _ = controller.stop();
                break;
            }
            if controller.is_recording() {
                if let Some(frame) = controller.queue.pop_timeout(timeout) {
                    let _ = controller.handle_frame(frame);
                }
            } else {
                pacer.wait();
            }
        })
        .expect("spawn capture thread");
    WorkerHandle { sender, join: Some(join) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_factor_below_floor_pauses() {
        assert_eq!(resolve_cycles_factor(0.0000001), FactorState::Paused);
    }

    #[test]
    fn cycles_factor_above_ceiling_saturates() {
        assert_eq!(resolve_cycles_factor(10.0), FactorState::Running(CYCLES_FACTOR_MAX));
    }

    #[test]
    fn cycles_factor_within_bounds_passes_through() {
        assert_eq!(resolve_cycles_factor(2.0), FactorState::Running(2.0));
    }

    #[test]
    fn rendezvous_blocks_until_every_armed_worker_arrives() {
        let rv = Arc::new(Rendezvous::new());
        rv.arm(2);
        let rv2 = Arc::clone(&rv);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            rv2.arrive();
        });
        rv.arrive();
        // One of the two arrivals is delayed; wait() must not return early.
        let start = std::time::Instant::now();
        rv.wait();
        assert!(start.elapsed() >= Duration::from_millis(10));
        handle.join().unwrap();
    }

    #[test]
    fn orchestrator_starts_runs_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = OrchestratorConfig {
            machine: MachineConfig { heartbeat_ns: 1_000_000, cycle_ns_per_instruction: 100.0, cycles_factor: 1.0 },
            mixer_output_spec: AudioSpec::new(2, 48_000),
            mixer_prebuffer_us: 20_000,
            mixer_ring_capacity_frames: 8192,
            capture_queue_capacity: 8,
            capture_dir: dir.path().to_path_buf(),
            capture_codec: VideoCodec::Bmp,
            capture_quality: 6,
            command_queue_capacity: 32,
        };
        let orch = Orchestrator::new(cfg, Box::new(NullCpu));
        orch.cycles_adjust(1.5).unwrap();
        thread::sleep(Duration::from_millis(5));
        orch.shutdown();
    }

    #[test]
    fn barrier_runs_all_three_handlers_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = OrchestratorConfig {
            machine: MachineConfig { heartbeat_ns: 1_000_000, cycle_ns_per_instruction: 100.0, cycles_factor: 1.0 },
            mixer_output_spec: AudioSpec::new(2, 48_000),
            mixer_prebuffer_us: 20_000,
            mixer_ring_capacity_frames: 8192,
            capture_queue_capacity: 8,
            capture_dir: dir.path().to_path_buf(),
            capture_codec: VideoCodec::Bmp,
            capture_quality: 6,
            command_queue_capacity: 32,
        };
        let orch = Orchestrator::new(cfg, Box::new(NullCpu));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (s1, s2, s3) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
        orch.config_changed(
            move || s1.lock().unwrap().push("machine"),
            move || s2.lock().unwrap().push("mixer"),
            move || s3.lock().unwrap().push("capture"),
        );
        let mut got = seen.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec!["capture", "machine", "mixer"]);
        orch.shutdown();
    }
}

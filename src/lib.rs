//! Timing, orchestration and audio/video streaming substrate for a
//! PS/1-class machine emulator: the global event scheduler,
//! the three-thread Machine/Mixer/Capture orchestration model, the audio
//! mixer and its DSP chain, storage device timing and the ATA/ATAPI
//! controller, the capture/AVI pipeline, and the keymap/input engine.
//!
//! CPU instruction decode/execute, VGA CRTC timing, device register
//! behavior and widget layout are out of scope — this crate
//! defines the collaborator traits they plug into (`CpuCollaborator` and
//! friends) but never implements them.

pub mod chrono;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod savestate;
pub mod scheduler;

pub mod audio;
pub mod capture;
pub mod input;
pub mod storage;

pub use chrono::{Chrono, Pacer};
pub use config::Config;
pub use error::{CoreError, CoreResult, SenseData};
pub use orchestrator::{CpuCollaborator, CyclesConsumed, NullCpu, Orchestrator, OrchestratorConfig};
pub use scheduler::{Scheduler, TimerId};

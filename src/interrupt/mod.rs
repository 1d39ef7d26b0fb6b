//! # Interrupt / Resume Correlation
//!
//! Unifies the pre-interrupt and post-resume executions of one logical run.
//! The host calls [`InterruptResumeCorrelator::on_interrupt`] at its suspend
//! point and [`InterruptResumeCorrelator::on_resume`] when the thread continues;
//! human decisions taken during the suspension are recorded independently and
//! correlated by thread id.

pub mod correlator;
pub mod records;

pub use correlator::InterruptResumeCorrelator;
pub use records::{HumanDecision, InterruptRecord, InterruptStats, ResumeRecord};

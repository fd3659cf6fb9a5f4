//! Adversarial Probe
//!
//! Iterative fast-gradient-sign attack for building adversarial test sets. It
//! perturbs clean images within an L-infinity budget and returns only the
//! ones whose deterministic label actually flipped.
//!
//! # References
//! - Goodfellow et al. (2015) "Explaining and Harnessing Adversarial Examples"
//! - Kurakin et al. (2017) "Adversarial Examples in the Physical World"

pub mod fgsm;

pub use fgsm::{AdversarialBatch, AdversarialGenerator, AttackConfig, IterativeFgsm};

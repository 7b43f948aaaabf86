//! Verifier scheduling.
//!
//! Embedders toggle a verifier with [`GcRuntime::verify_barriers`]. Under a
//! verifier zeal mode, [`GcRuntime::maybe_verify_barriers`] is called at
//! every opportunity (allocation, by default) and rotates passes: once an
//! armed pass has seen `frequency` opportunities it is checked and a fresh
//! one is armed.
//!
//! Collections stop any armed pass before they start and re-arm it when
//! they finish, so a pass never spans a collection.

use crate::collector::IncrementalState;
use crate::config::{ViolationAction, ZealMode};
use crate::runtime::{GcRuntime, PausedVerifiers};
use crate::verify::{BarrierViolation, VerifierState, VerifierType, VerifyOutcome};

impl GcRuntime {
    /// The armed verifier, if any.
    pub fn active_verifier(&self) -> Option<VerifierType> {
        self.verifier.active()
    }

    /// Toggle `kind`: end and check it if armed, start it otherwise.
    ///
    /// # Panics
    ///
    /// Panics on a violation under [`ViolationAction::Abort`].
    pub fn verify_barriers(&mut self, kind: VerifierType) -> Result<(), BarrierViolation> {
        let armed = self.verifier.active() == Some(kind);
        match (kind, armed) {
            (VerifierType::PreBarrier, true) => {
                let outcome = self.end_verify_pre_barriers();
                self.check_outcome(outcome)
            }
            (VerifierType::PreBarrier, false) => {
                self.start_verify_pre_barriers();
                Ok(())
            }
            (VerifierType::PostBarrier, true) => {
                let outcome = self.end_verify_post_barriers();
                self.check_outcome(outcome)
            }
            (VerifierType::PostBarrier, false) => {
                self.start_verify_post_barriers();
                Ok(())
            }
        }
    }

    /// One zeal opportunity.
    ///
    /// Does nothing unless a verifier zeal mode is selected and GC is not
    /// suppressed. An armed pass is checked once it has seen `frequency`
    /// opportunities, or right away if `always` is set; a new pass is then
    /// armed. After a violation no new pass is armed.
    ///
    /// # Panics
    ///
    /// Panics on a violation under [`ViolationAction::Abort`].
    pub fn maybe_verify_barriers(&mut self, always: bool) -> Result<(), BarrierViolation> {
        if self.suppress_gc > 0 {
            return Ok(());
        }
        let frequency = self.config.zeal.frequency;
        match self.config.zeal.mode {
            ZealMode::VerifierPre => {
                if let VerifierState::Pre(pass) = &mut self.verifier {
                    pass.count += 1;
                    if pass.count < frequency && !always {
                        return Ok(());
                    }
                    let outcome = self.end_verify_pre_barriers();
                    self.check_outcome(outcome)?;
                }
                self.start_verify_pre_barriers();
            }
            ZealMode::VerifierPost => {
                if !self.heap.store_buffer().is_enabled() {
                    return Ok(());
                }
                if let VerifierState::Post(pass) = &mut self.verifier {
                    pass.count += 1;
                    if pass.count < frequency && !always {
                        return Ok(());
                    }
                    let outcome = self.end_verify_post_barriers();
                    self.check_outcome(outcome)?;
                }
                self.start_verify_post_barriers();
            }
            _ => {}
        }
        Ok(())
    }

    /// Tear down the armed pass without checking it.
    pub fn finish_verifier(&mut self) {
        match std::mem::take(&mut self.verifier) {
            VerifierState::Idle => {}
            VerifierState::Pre(pass) => {
                log::debug!(
                    "pre-barrier verifier (gc #{}) torn down unchecked",
                    pass.gc_number()
                );
                for zone in self.heap.zones_mut() {
                    zone.set_needs_barrier(false);
                }
                self.incremental_state = IncrementalState::NotActive;
                self.marker.reset();
                self.heap.clear_marks();
                self.heap.nursery_mut().enable();
            }
            VerifierState::Post(pass) => {
                log::debug!(
                    "post-barrier verifier (gc #{}) torn down unchecked",
                    pass.gc_number()
                );
            }
        }
    }

    /// End and check the armed pass ahead of a collection.
    ///
    /// Violations are handled as for [`verify_barriers`](Self::verify_barriers),
    /// except that under [`ViolationAction::Report`] they are kept for
    /// [`take_reported_violations`](Self::take_reported_violations).
    pub(crate) fn stop_verifiers(&mut self) -> PausedVerifiers {
        let paused = match self.verifier.active() {
            Some(VerifierType::PreBarrier) => {
                let outcome = self.end_verify_pre_barriers();
                self.keep_violation(outcome);
                PausedVerifiers {
                    pre: true,
                    post: false,
                }
            }
            Some(VerifierType::PostBarrier) => {
                let outcome = self.end_verify_post_barriers();
                self.keep_violation(outcome);
                PausedVerifiers {
                    pre: false,
                    post: true,
                }
            }
            None => PausedVerifiers::default(),
        };
        if paused.pre || paused.post {
            log::trace!("verifiers paused for collection: {paused:?}");
        }
        paused
    }

    /// Re-arm the passes [`stop_verifiers`](Self::stop_verifiers) ended.
    pub(crate) fn restart_verifiers(&mut self, paused: PausedVerifiers) {
        if paused.pre {
            self.start_verify_pre_barriers();
        }
        if paused.post && self.heap.nursery().is_enabled() {
            self.start_verify_post_barriers();
        }
    }

    fn keep_violation(&mut self, outcome: Result<VerifyOutcome, BarrierViolation>) {
        if let Err(violation) = self.check_outcome(outcome) {
            self.reported_violations.push(violation);
        }
    }

    fn check_outcome(
        &self,
        outcome: Result<VerifyOutcome, BarrierViolation>,
    ) -> Result<(), BarrierViolation> {
        match outcome {
            Ok(_) => Ok(()),
            Err(violation) => match self.config.violation_action {
                ViolationAction::Abort => {
                    log::error!("{violation}");
                    panic!("{violation}");
                }
                ViolationAction::Report => Err(violation),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::GcScope;
    use crate::config::{GcConfig, ZealSettings};
    use crate::heap::CompartmentId;
    use crate::heap::cell::{CellId, CellKind, Value};
    use crate::roots::Rooted;

    fn runtime(config: GcConfig) -> (GcRuntime, CompartmentId) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut rt = GcRuntime::new(config).unwrap();
        let (_, c) = rt.heap_mut().new_zone_with_compartment();
        (rt, c)
    }

    /// A rooted string holding another string.
    fn rooted_pair(rt: &mut GcRuntime, c: CompartmentId) -> (Rooted, CellId, CellId) {
        let child = rt.alloc(CellKind::String, c, []);
        let parent = rt.alloc(CellKind::String, c, [Value::Cell(child)]);
        (rt.roots().main_thread().root_object(parent), parent, child)
    }

    #[test]
    fn test_verify_barriers_toggles() {
        let (mut rt, c) = runtime(GcConfig::testing());
        let _pair = rooted_pair(&mut rt, c);
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        assert_eq!(rt.active_verifier(), Some(VerifierType::PreBarrier));
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        assert_eq!(rt.active_verifier(), None);
        assert_eq!(rt.incremental_state(), IncrementalState::NotActive);
    }

    #[test]
    fn test_other_verifier_is_left_alone() {
        let (mut rt, _) = runtime(GcConfig::testing());
        rt.verify_barriers(VerifierType::PostBarrier).unwrap();
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        assert_eq!(rt.active_verifier(), Some(VerifierType::PostBarrier));
    }

    #[test]
    fn test_report_returns_violation() {
        let (mut rt, c) = runtime(GcConfig::testing());
        let (_root, parent, _) = rooted_pair(&mut rt, c);
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        rt.set_slot_unbarriered(parent, 0, Value::Null);
        let violation = rt.verify_barriers(VerifierType::PreBarrier).unwrap_err();
        assert_eq!(violation.verifier(), VerifierType::PreBarrier);
        assert_eq!(rt.active_verifier(), None);
    }

    #[test]
    #[should_panic(expected = "Unmarked edge")]
    fn test_abort_panics() {
        let (mut rt, c) = runtime(GcConfig::default());
        let (_root, parent, _) = rooted_pair(&mut rt, c);
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        rt.set_slot_unbarriered(parent, 0, Value::Null);
        let _ = rt.verify_barriers(VerifierType::PreBarrier);
    }

    #[test]
    fn test_zeal_rotates_after_frequency() {
        let (mut rt, _) = runtime(GcConfig::testing());
        rt.set_zeal(ZealSettings::new(ZealMode::VerifierPre, 3)).unwrap();

        rt.maybe_verify_barriers(false).unwrap();
        assert_eq!(rt.gc_number(), 1);
        rt.maybe_verify_barriers(false).unwrap();
        rt.maybe_verify_barriers(false).unwrap();
        assert_eq!(rt.gc_number(), 1);
        rt.maybe_verify_barriers(false).unwrap();
        assert_eq!(rt.gc_number(), 2);
        assert_eq!(rt.active_verifier(), Some(VerifierType::PreBarrier));
    }

    #[test]
    fn test_always_rotates_immediately() {
        let (mut rt, _) = runtime(GcConfig::testing());
        rt.set_zeal(ZealSettings::new(ZealMode::VerifierPost, 100)).unwrap();
        rt.maybe_verify_barriers(false).unwrap();
        rt.maybe_verify_barriers(true).unwrap();
        assert_eq!(rt.gc_number(), 2);
    }

    #[test]
    fn test_zeal_off_or_suppressed_does_nothing() {
        let (mut rt, _) = runtime(GcConfig::testing());
        rt.maybe_verify_barriers(true).unwrap();
        assert_eq!(rt.active_verifier(), None);

        rt.set_zeal(ZealSettings::new(ZealMode::VerifierPre, 1)).unwrap();
        rt.with_gc_suppressed(|rt| rt.maybe_verify_barriers(true))
            .unwrap();
        assert_eq!(rt.active_verifier(), None);
    }

    #[test]
    fn test_post_zeal_needs_store_buffer() {
        let (mut rt, _) = runtime(GcConfig {
            generational: false,
            ..GcConfig::testing()
        });
        rt.set_zeal(ZealSettings::new(ZealMode::VerifierPost, 1)).unwrap();
        rt.maybe_verify_barriers(true).unwrap();
        assert_eq!(rt.active_verifier(), None);
        assert_eq!(rt.gc_number(), 0);
    }

    #[test]
    fn test_alloc_zeal_collects_violations() {
        let (mut rt, c) = runtime(GcConfig::testing());
        let (_root, parent, _) = rooted_pair(&mut rt, c);
        rt.set_zeal(ZealSettings::new(ZealMode::VerifierPre, 2)).unwrap();
        rt.alloc(CellKind::String, c, []);
        assert_eq!(rt.active_verifier(), Some(VerifierType::PreBarrier));
        rt.set_slot_unbarriered(parent, 0, Value::Null);
        rt.alloc(CellKind::String, c, []);
        rt.alloc(CellKind::String, c, []);

        let violations = rt.take_reported_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].source(), parent);
    }

    #[test]
    fn test_collection_rearms_verifier() {
        let (mut rt, c) = runtime(GcConfig::testing());
        let _pair = rooted_pair(&mut rt, c);
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        let before = rt.gc_number();

        let result = rt.collect(GcScope::All);
        assert_eq!(result.gc_number, before + 1);
        assert_eq!(rt.active_verifier(), Some(VerifierType::PreBarrier));
        assert_eq!(rt.gc_number(), before + 2);
        assert!(rt.take_reported_violations().is_empty());
    }

    #[test]
    fn test_collection_checks_armed_pass() {
        let (mut rt, c) = runtime(GcConfig::testing());
        let (_root, parent, child) = rooted_pair(&mut rt, c);
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        rt.set_slot_unbarriered(parent, 0, Value::Null);

        rt.collect(GcScope::All);
        let violations = rt.take_reported_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].target(), child);
    }

    #[test]
    fn test_finish_verifier_restores_state() {
        let (mut rt, c) = runtime(GcConfig::testing());
        let _pair = rooted_pair(&mut rt, c);
        rt.verify_barriers(VerifierType::PreBarrier).unwrap();
        rt.finish_verifier();

        assert_eq!(rt.active_verifier(), None);
        assert_eq!(rt.incremental_state(), IncrementalState::NotActive);
        assert!(rt.heap().nursery().is_enabled());
        assert!(rt.heap().marked_cells().is_empty());
        assert!(rt.heap().zones().all(|(_, zone)| !zone.needs_barrier()));
    }

    #[test]
    fn test_leaving_zeal_mode_tears_down() {
        let (mut rt, _) = runtime(GcConfig::testing());
        rt.set_zeal(ZealSettings::new(ZealMode::VerifierPost, 5)).unwrap();
        rt.maybe_verify_barriers(false).unwrap();
        assert_eq!(rt.active_verifier(), Some(VerifierType::PostBarrier));
        rt.set_zeal(ZealSettings::default()).unwrap();
        assert_eq!(rt.active_verifier(), None);
    }
}

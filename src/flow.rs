//! Permission-gated entry flow of the scan screen.
//!
//! One flow instance lives for one visit to the scan screen. The gate
//! resolves at most once; a session only ever exists after the gate
//! resolved to Granted.

use crate::error::ScanError;
use crate::permission::{PermissionGate, PermissionState};
use crate::session::{ScanSession, Surface, SurfaceEvent, SurfaceObserver};

/// What entering the scan screen resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Permission in hand, session constructed.
    SessionReady,
    /// The platform prompt was issued; the result arrives asynchronously.
    PromptShown,
    /// The gate resolved to Denied; the screen stays inert.
    PermissionDenied,
}

pub struct ScanFlow {
    permission: PermissionState,
    session: Option<ScanSession>,
}

impl ScanFlow {
    pub fn new() -> Self {
        ScanFlow {
            permission: PermissionState::Unknown,
            session: None,
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    /// Runs the permission gate at screen entry. Already-granted skips the
    /// prompt and constructs the session immediately.
    pub fn enter(
        &mut self,
        gate: &dyn PermissionGate,
        make_session: impl FnOnce() -> ScanSession,
    ) -> Result<FlowOutcome, ScanError> {
        match gate.check() {
            PermissionState::Granted => {
                self.permission = PermissionState::Granted;
                self.session = Some(make_session());
                Ok(FlowOutcome::SessionReady)
            }
            PermissionState::Denied | PermissionState::Unknown => {
                gate.request()?;
                Ok(FlowOutcome::PromptShown)
            }
        }
    }

    /// Delivers the asynchronous permission-request result. Once the gate
    /// has resolved, later results are ignored.
    pub fn on_permission_result(
        &mut self,
        granted: bool,
        make_session: impl FnOnce() -> ScanSession,
    ) -> FlowOutcome {
        match self.permission {
            PermissionState::Granted => return FlowOutcome::SessionReady,
            PermissionState::Denied => return FlowOutcome::PermissionDenied,
            PermissionState::Unknown => {}
        }
        if granted {
            self.permission = PermissionState::Granted;
            self.session = Some(make_session());
            FlowOutcome::SessionReady
        } else {
            self.permission = PermissionState::Denied;
            FlowOutcome::PermissionDenied
        }
    }

    /// Routes a surface lifecycle event to the session, if one exists.
    pub fn surface_event(
        &mut self,
        event: SurfaceEvent,
        surface: &Surface,
    ) -> Result<(), ScanError> {
        match self.session.as_mut() {
            Some(session) => session.on_surface_event(event, surface),
            None => Ok(()),
        }
    }

    /// Stops and releases the session; the screen is being terminated.
    pub fn teardown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
        self.session = None;
    }
}

impl Default for ScanFlow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};

    use anyhow::Result;

    use super::*;
    use crate::camera::FrameSource;
    use crate::detect::DecodedCandidate;
    use crate::session::{CameraFactory, SessionState};

    struct FakeGate {
        state: Cell<PermissionState>,
        requests: Cell<usize>,
    }

    impl FakeGate {
        fn new(state: PermissionState) -> Self {
            FakeGate {
                state: Cell::new(state),
                requests: Cell::new(0),
            }
        }
    }

    impl PermissionGate for FakeGate {
        fn check(&self) -> PermissionState {
            self.state.get()
        }

        fn request(&self) -> Result<()> {
            self.requests.set(self.requests.get() + 1);
            Ok(())
        }
    }

    struct FakeSource {
        starts: Arc<Mutex<usize>>,
    }

    impl FrameSource for FakeSource {
        fn start(&mut self, _surface: &Surface) -> Result<(), ScanError> {
            *self.starts.lock().unwrap() += 1;
            Ok(())
        }

        fn stop(&mut self) {}
    }

    struct SessionRig {
        starts: Arc<Mutex<usize>>,
        decoded: Arc<Mutex<Vec<String>>>,
    }

    impl SessionRig {
        fn new() -> Self {
            SessionRig {
                starts: Arc::new(Mutex::new(0)),
                decoded: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn make_session(&self) -> ScanSession {
            let starts = Arc::clone(&self.starts);
            let factory: CameraFactory = Box::new(move |_detector| {
                Ok(Box::new(FakeSource {
                    starts: Arc::clone(&starts),
                }) as Box<dyn FrameSource>)
            });
            let sink = Arc::clone(&self.decoded);
            ScanSession::new(
                factory,
                Box::new(move |text| sink.lock().unwrap().push(text)),
            )
        }
    }

    fn surface() -> Surface {
        let (tx, _rx) = channel();
        Surface::new(tx, 1280, 720)
    }

    #[test]
    fn granted_at_entry_skips_the_prompt() {
        let gate = FakeGate::new(PermissionState::Granted);
        let rig = SessionRig::new();
        let mut flow = ScanFlow::new();

        let outcome = flow.enter(&gate, || rig.make_session()).unwrap();
        assert_eq!(outcome, FlowOutcome::SessionReady);
        assert_eq!(gate.requests.get(), 0);
        assert!(flow.session().is_some());
    }

    #[test]
    fn not_granted_at_entry_prompts_once_without_a_session() {
        let gate = FakeGate::new(PermissionState::Denied);
        let rig = SessionRig::new();
        let mut flow = ScanFlow::new();

        let outcome = flow.enter(&gate, || rig.make_session()).unwrap();
        assert_eq!(outcome, FlowOutcome::PromptShown);
        assert_eq!(gate.requests.get(), 1);
        assert!(flow.session().is_none());
        assert_eq!(flow.permission(), PermissionState::Unknown);
    }

    #[test]
    fn denied_result_never_constructs_a_session_or_starts_a_camera() {
        let gate = FakeGate::new(PermissionState::Denied);
        let rig = SessionRig::new();
        let mut flow = ScanFlow::new();
        flow.enter(&gate, || rig.make_session()).unwrap();

        let outcome = flow.on_permission_result(false, || rig.make_session());
        assert_eq!(outcome, FlowOutcome::PermissionDenied);
        assert!(flow.session().is_none());

        // Surface events on a denied screen are inert.
        flow.surface_event(SurfaceEvent::Created, &surface()).unwrap();
        assert_eq!(*rig.starts.lock().unwrap(), 0);
    }

    #[test]
    fn granted_result_constructs_the_session_and_the_surface_starts_it() {
        let gate = FakeGate::new(PermissionState::Denied);
        let rig = SessionRig::new();
        let mut flow = ScanFlow::new();
        flow.enter(&gate, || rig.make_session()).unwrap();

        let outcome = flow.on_permission_result(true, || rig.make_session());
        assert_eq!(outcome, FlowOutcome::SessionReady);

        flow.surface_event(SurfaceEvent::Created, &surface()).unwrap();
        assert_eq!(*rig.starts.lock().unwrap(), 1);
        assert_eq!(
            flow.session().unwrap().state(),
            SessionState::Capturing
        );
    }

    #[test]
    fn gate_resolves_at_most_once() {
        let gate = FakeGate::new(PermissionState::Denied);
        let rig = SessionRig::new();
        let mut flow = ScanFlow::new();
        flow.enter(&gate, || rig.make_session()).unwrap();
        flow.on_permission_result(false, || rig.make_session());

        // A late grant after Denied does not revive the screen.
        let outcome = flow.on_permission_result(true, || rig.make_session());
        assert_eq!(outcome, FlowOutcome::PermissionDenied);
        assert!(flow.session().is_none());
    }

    #[test]
    fn a_fresh_flow_resets_the_detection_latch() {
        let gate = FakeGate::new(PermissionState::Granted);
        let rig = SessionRig::new();
        let surface = surface();

        let mut flow = ScanFlow::new();
        flow.enter(&gate, || rig.make_session()).unwrap();
        flow.surface_event(SurfaceEvent::Created, &surface).unwrap();

        // First visit decodes a value and the screen is terminated.
        deliver(&flow, "12345");
        assert!(flow.session().unwrap().detection_consumed());
        flow.teardown();

        // Back navigation constructs a fresh scan screen; the latch is
        // reset and a second decode fires again.
        let mut flow = ScanFlow::new();
        flow.enter(&gate, || rig.make_session()).unwrap();
        flow.surface_event(SurfaceEvent::Created, &surface).unwrap();
        assert!(!flow.session().unwrap().detection_consumed());
        deliver(&flow, "67890");

        assert_eq!(
            *rig.decoded.lock().unwrap(),
            vec!["12345".to_string(), "67890".to_string()]
        );
    }

    /// Drives the session's detector the way the capture thread would.
    fn deliver(flow: &ScanFlow, value: &str) {
        flow.session()
            .unwrap()
            .detector()
            .unwrap()
            .deliver(&[DecodedCandidate {
                display_value: value.to_string(),
            }]);
    }
}

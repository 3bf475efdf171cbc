//! Application shell: the two-screen slint window and the wiring between
//! the UI thread and the capture thread.

use std::{
    cell::RefCell,
    rc::Rc,
    sync::mpsc::{channel, Receiver},
    time::{Duration, Instant},
};

use anyhow::Result;
use log::{error, info};
use slint::{Image, SharedString, Timer, TimerMode};

use crate::camera::{CameraConfig, CameraSource, FrameSource, PREVIEW_HEIGHT, PREVIEW_WIDTH};
use crate::error::ScanError;
use crate::flow::{FlowOutcome, ScanFlow};
use crate::nav::{HandoffPayload, NavigationHandoff, Screen, ScreenHost};
use crate::permission::{PermissionGate, PermissionState};
use crate::session::{CameraFactory, ScanSession, SessionEvent, Surface, SurfaceEvent};

slint::slint! {
    import { Button, VerticalBox } from "std-widgets.slint";

    export component MainWindow inherits Window {
        title: "Barcode Scanner";
        background: black;

        in-out property <image> camera-frame;
        in-out property <bool> showing-display;
        in-out property <string> decoded-text;
        in-out property <string> notice;

        callback back-to-scan();

        if !root.showing-display : Rectangle {
            width: 100%;
            height: 100%;
            Image {
                source: root.camera-frame;
                image-fit: contain;
                width: 100%;
                height: 100%;
            }
            Text {
                text: root.notice;
                color: white;
                font-size: 18px;
                x: (parent.width - self.width) / 2;
                y: parent.height - 60px;
            }
        }

        if root.showing-display : VerticalBox {
            alignment: center;
            Text {
                text: "Scanned code";
                color: white;
                horizontal-alignment: center;
            }
            Text {
                text: root.decoded-text;
                color: white;
                font-size: 28px;
                horizontal-alignment: center;
            }
            Button {
                text: "Scan again";
                clicked => {
                    root.back-to-scan();
                }
            }
        }
    }
}

/// How long a transient notice stays on screen.
const NOTICE_DURATION: Duration = Duration::from_secs(2);
/// How often the pending permission prompt is re-queried.
const PROMPT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// A prompt that never resolves to Granted within this window counts as
/// denied.
const PROMPT_DEADLINE: Duration = Duration::from_secs(60);

struct Shell {
    flow: ScanFlow,
    nav: NavigationHandoff,
    surface: Surface,
    prompt_deadline: Option<Instant>,
    last_prompt_poll: Instant,
}

/// The slint window as the screen host for navigation.
struct WindowHost<'a> {
    window: &'a MainWindow,
}

impl ScreenHost for WindowHost<'_> {
    fn present_display(&mut self, payload: &HandoffPayload) {
        self.window
            .set_decoded_text(payload.message().unwrap_or_default().into());
        self.window.set_showing_display(true);
    }

    fn present_scan(&mut self) {
        self.window.set_decoded_text("".into());
        self.window.set_camera_frame(Image::default());
        self.window.set_showing_display(false);
    }
}

pub fn run(
    #[cfg(target_os = "android")] android_app: slint::android::AndroidApp,
) -> Result<()> {
    let app = MainWindow::new()?;

    let (events_tx, events_rx) = channel();
    let surface = Surface::new(events_tx, PREVIEW_WIDTH, PREVIEW_HEIGHT);

    #[cfg(target_os = "android")]
    let gate: Rc<dyn PermissionGate> =
        Rc::new(crate::permission::AndroidPermissionGate::new(android_app));
    #[cfg(not(target_os = "android"))]
    let gate: Rc<dyn PermissionGate> = Rc::new(crate::permission::HostPermissionGate);

    let shell = Rc::new(RefCell::new(Shell {
        flow: ScanFlow::new(),
        nav: NavigationHandoff::new(),
        surface,
        prompt_deadline: None,
        last_prompt_poll: Instant::now(),
    }));

    {
        let mut shell = shell.borrow_mut();
        enter_scan_screen(&app, &mut shell, gate.as_ref());
    }

    // Pumps capture-thread events into the UI, 10ms like a frame timer.
    let timer = Timer::default();
    {
        let shell = Rc::clone(&shell);
        let gate = Rc::clone(&gate);
        let weak = app.as_weak();
        timer.start(TimerMode::Repeated, Duration::from_millis(10), move || {
            if let Some(app) = weak.upgrade() {
                let mut shell = shell.borrow_mut();
                pump(&app, &mut shell, gate.as_ref(), &events_rx);
            }
        });
    }

    {
        let shell = Rc::clone(&shell);
        let gate = Rc::clone(&gate);
        let weak = app.as_weak();
        app.on_back_to_scan(move || {
            let Some(app) = weak.upgrade() else { return };
            let mut shell = shell.borrow_mut();
            let mut host = WindowHost { window: &app };
            shell.nav.go_back_to_scan(&mut host);
            // The display screen is terminated and the scan screen rebuilt
            // from scratch: fresh permission gate, fresh session, fresh
            // detection latch.
            shell.flow = ScanFlow::new();
            enter_scan_screen(&app, &mut shell, gate.as_ref());
        });
    }

    app.run()?;

    // Window gone: the surface is destroyed and the camera must not be
    // left running.
    let mut shell = shell.borrow_mut();
    let surface = shell.surface.clone();
    let _ = shell.flow.surface_event(SurfaceEvent::Destroyed, &surface);
    shell.flow.teardown();
    Ok(())
}

/// Builds a session whose camera feeds `surface` and whose decoded payload
/// comes back over the surface's event channel.
fn make_session(surface: &Surface) -> ScanSession {
    let events = surface.sender();
    let factory: CameraFactory = Box::new(move |detector| {
        CameraSource::build(CameraConfig::default(), detector)
            .map(|camera| Box::new(camera) as Box<dyn FrameSource>)
    });
    ScanSession::new(
        factory,
        Box::new(move |text| {
            let _ = events.send(SessionEvent::Decoded(text));
        }),
    )
}

fn enter_scan_screen(app: &MainWindow, shell: &mut Shell, gate: &dyn PermissionGate) {
    let surface = shell.surface.clone();
    match shell.flow.enter(gate, || make_session(&surface)) {
        Ok(FlowOutcome::SessionReady) => {
            shell.prompt_deadline = None;
            surface_created(app, shell);
        }
        Ok(FlowOutcome::PromptShown) => {
            shell.prompt_deadline = Some(Instant::now() + PROMPT_DEADLINE);
            shell.last_prompt_poll = Instant::now();
        }
        Ok(FlowOutcome::PermissionDenied) => {
            show_notice(app, ScanError::PermissionDenied.user_notice());
        }
        Err(err) => {
            error!("failed to enter scan screen: {err:?}");
            show_notice(app, err.user_notice());
        }
    }
}

/// The preview region is ready to receive frames.
fn surface_created(app: &MainWindow, shell: &mut Shell) {
    let surface = shell.surface.clone();
    if let Err(err) = shell.flow.surface_event(SurfaceEvent::Created, &surface) {
        error!("camera start failed: {err:?}");
        show_notice(app, err.user_notice());
    }
}

fn pump(
    app: &MainWindow,
    shell: &mut Shell,
    gate: &dyn PermissionGate,
    events: &Receiver<SessionEvent>,
) {
    poll_pending_prompt(app, shell, gate);

    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Preview(frame) => {
                if shell.nav.current() == Screen::Scan {
                    app.set_camera_frame(Image::from_rgba8(frame));
                }
            }
            SessionEvent::Decoded(text) => {
                if shell.nav.current() != Screen::Scan {
                    continue;
                }
                info!("handing off decoded payload");
                // The scan screen is terminated, not hidden: stop the
                // camera and drop the session before the display shows, so
                // back never returns to a live capture.
                let surface = shell.surface.clone();
                let _ = shell.flow.surface_event(SurfaceEvent::Destroyed, &surface);
                shell.flow.teardown();
                let mut host = WindowHost { window: app };
                shell.nav.go_to_display(&mut host, text);
            }
        }
    }
}

/// Resolves a pending permission prompt by re-querying the gate on the UI
/// thread; the platform glue delivers no result callback of its own.
fn poll_pending_prompt(app: &MainWindow, shell: &mut Shell, gate: &dyn PermissionGate) {
    let Some(deadline) = shell.prompt_deadline else {
        return;
    };
    if shell.flow.permission() != PermissionState::Unknown || shell.nav.current() != Screen::Scan {
        shell.prompt_deadline = None;
        return;
    }
    let now = Instant::now();
    if now.duration_since(shell.last_prompt_poll) < PROMPT_POLL_INTERVAL {
        return;
    }
    shell.last_prompt_poll = now;

    let surface = shell.surface.clone();
    if gate.check() == PermissionState::Granted {
        shell.prompt_deadline = None;
        shell
            .flow
            .on_permission_result(true, || make_session(&surface));
        surface_created(app, shell);
    } else if now >= deadline {
        shell.prompt_deadline = None;
        shell
            .flow
            .on_permission_result(false, || make_session(&surface));
        show_notice(app, ScanError::PermissionDenied.user_notice());
    }
}

/// Transient toast-like notice at the bottom of the scan screen.
fn show_notice(app: &MainWindow, text: &str) {
    let shown: SharedString = text.into();
    app.set_notice(shown.clone());
    let weak = app.as_weak();
    Timer::single_shot(NOTICE_DURATION, move || {
        if let Some(app) = weak.upgrade() {
            // Only clear if a later notice hasn't replaced this one.
            if app.get_notice() == shown {
                app.set_notice("".into());
            }
        }
    });
}

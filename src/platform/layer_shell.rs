//! Overlay surfaces as gtk4-layer-shell windows.
//!
//! Each surface is its own layer-shell window anchored to the top-left
//! corner; its position is expressed through margins. Input callbacks look
//! the live overlay up in the registry, so no window holds the service.

use gtk4::gdk;
use gtk4::glib;
use gtk4::prelude::*;
use gtk4::{Application, DrawingArea, GestureClick, GestureDrag};
use gtk4_layer_shell::{Edge, KeyboardMode, Layer, LayerShell as _};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::rc::Rc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{FRAME_INTERVAL, tick_overlay};
use crate::geometry::{Point, Screen};
use crate::gesture::{TouchEvent, TouchPhase};
use crate::menu::MENU_ENTRIES;
use crate::registry::{self, OVERLAY_KEY, OverlayControl};
use crate::service::{self, UiDispatcher, UiRequest};
use crate::surface::{Compositor, Extent, LayoutParams, SurfaceError, SurfaceKind, SurfaceLayer};

const APP_ID: &str = "dev.spark.Bubble";
const NAMESPACE: &str = "spark-bubble";

const STYLE: &str = "
window.spark-surface, window.spark-surface.background { background-color: transparent; }
.spark-scrim { background-color: rgba(0, 0, 0, 0.16); }
.spark-menu { background-color: #ffffff; border-radius: 12px; padding: 8px; }
.spark-menu button { padding: 10px 16px; }
";

/// Run a closure against the live overlay, if there is one and it is free.
fn with_overlay(f: impl FnOnce(&mut dyn OverlayControl)) {
    let Some(overlay) = registry::current(OVERLAY_KEY) else {
        return;
    };
    match overlay.try_borrow_mut() {
        Ok(mut overlay) => f(&mut *overlay),
        Err(_) => debug!("Overlay busy; dropping input"),
    };
}

fn touch(phase: TouchPhase, x: f64, y: f64) {
    let event = TouchEvent::new(phase, x, y, Instant::now());
    with_overlay(|overlay| overlay.handle_touch(&event));
}

pub struct LayerShellCompositor {
    app: Application,
    screen: Screen,
    windows: HashMap<SurfaceKind, gtk4::Window>,
    label: Rc<RefCell<String>>,
    /// Last applied bubble origin, read by the drag handlers
    bubble_origin: Rc<Cell<Point>>,
    bubble_area: Option<DrawingArea>,
    frame_pending: Rc<Cell<bool>>,
}

impl LayerShellCompositor {
    pub fn new(app: Application, screen: Screen) -> Self {
        Self {
            app,
            screen,
            windows: HashMap::new(),
            label: Rc::new(RefCell::new(String::new())),
            bubble_origin: Rc::new(Cell::new(Point::default())),
            bubble_area: None,
            frame_pending: Rc::new(Cell::new(false)),
        }
    }

    fn build_window(&self, kind: SurfaceKind, params: &LayoutParams) -> gtk4::Window {
        let window = gtk4::Window::builder()
            .application(&self.app)
            .title(format!("Spark {}", kind.name()))
            .decorated(false)
            .resizable(false)
            .build();
        window.add_css_class("spark-surface");

        window.init_layer_shell();
        window.set_layer(match params.layer {
            SurfaceLayer::Overlay => Layer::Overlay,
            SurfaceLayer::Top => Layer::Top,
        });
        window.set_namespace(Some(NAMESPACE));
        window.set_exclusive_zone(-1);
        window.set_keyboard_mode(if params.flags.not_focusable {
            KeyboardMode::None
        } else {
            KeyboardMode::OnDemand
        });

        let fill = params.width == Extent::MatchParent;
        window.set_anchor(Edge::Top, true);
        window.set_anchor(Edge::Left, true);
        window.set_anchor(Edge::Right, fill);
        window.set_anchor(Edge::Bottom, fill);
        window
    }

    fn bubble_content(&mut self, params: &LayoutParams) -> DrawingArea {
        let side = match params.width {
            Extent::Px(px) => px,
            _ => self.screen.dp(56),
        };
        let area = DrawingArea::builder()
            .content_width(side)
            .content_height(side)
            .build();

        let label = self.label.clone();
        area.set_draw_func(move |_, cr, width, height| {
            let (w, h) = (f64::from(width), f64::from(height));
            let radius = w.min(h) / 2.0;
            cr.set_source_rgb(45.0 / 255.0, 137.0 / 255.0, 239.0 / 255.0);
            cr.arc(w / 2.0, h / 2.0, radius, 0.0, 2.0 * PI);
            if let Err(e) = cr.fill() {
                warn!("Failed to paint bubble: {}", e);
                return;
            }

            let text = label.borrow();
            cr.set_source_rgb(1.0, 1.0, 1.0);
            cr.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Bold);
            cr.set_font_size(radius * 0.8);
            if let Ok(extents) = cr.text_extents(&text) {
                cr.move_to(
                    w / 2.0 - extents.width() / 2.0 - extents.x_bearing(),
                    h / 2.0 - extents.height() / 2.0 - extents.y_bearing(),
                );
                let _ = cr.show_text(&text);
            }
        });

        // Offsets are surface-local and the surface follows the finger, so the
        // screen point is the live origin plus where the drag started.
        let drag = GestureDrag::new();
        let start = Rc::new(Cell::new((0.0, 0.0)));
        let origin = self.bubble_origin.clone();
        let screen_point = move |start: (f64, f64), dx: f64, dy: f64| {
            let o = origin.get();
            (f64::from(o.x) + start.0 + dx, f64::from(o.y) + start.1 + dy)
        };
        {
            let start = start.clone();
            let screen_point = screen_point.clone();
            drag.connect_drag_begin(move |_, x, y| {
                start.set((x, y));
                let (rx, ry) = screen_point((x, y), 0.0, 0.0);
                touch(TouchPhase::Down, rx, ry);
            });
        }
        {
            let start = start.clone();
            let screen_point = screen_point.clone();
            drag.connect_drag_update(move |_, dx, dy| {
                let (rx, ry) = screen_point(start.get(), dx, dy);
                touch(TouchPhase::Move, rx, ry);
            });
        }
        {
            let start = start.clone();
            let screen_point = screen_point.clone();
            drag.connect_drag_end(move |_, dx, dy| {
                let (rx, ry) = screen_point(start.get(), dx, dy);
                touch(TouchPhase::Up, rx, ry);
            });
        }
        drag.connect_cancel(move |_, _| {
            let (rx, ry) = screen_point(start.get(), 0.0, 0.0);
            touch(TouchPhase::Cancel, rx, ry);
        });
        area.add_controller(drag);

        self.bubble_area = Some(area.clone());
        area
    }

    fn menu_content(params: &LayoutParams) -> gtk4::Box {
        let menu = gtk4::Box::new(gtk4::Orientation::Vertical, 4);
        menu.add_css_class("spark-menu");
        if let Extent::Px(width) = params.width {
            menu.set_size_request(width, -1);
        }
        for (index, entry) in MENU_ENTRIES.iter().enumerate() {
            let button = gtk4::Button::with_label(entry.label);
            button.connect_clicked(move |_| {
                with_overlay(|overlay| overlay.select_menu_entry(index));
            });
            menu.append(&button);
        }
        menu
    }

    fn scrim_content() -> gtk4::Box {
        let scrim = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
        scrim.add_css_class("spark-scrim");
        scrim.set_hexpand(true);
        scrim.set_vexpand(true);
        let click = GestureClick::new();
        click.connect_pressed(|_, _, _, _| {
            with_overlay(|overlay| overlay.tap_scrim());
        });
        scrim.add_controller(click);
        scrim
    }

    fn place(window: &gtk4::Window, params: &LayoutParams) {
        if params.width != Extent::MatchParent {
            window.set_margin(Edge::Left, params.origin.x);
            window.set_margin(Edge::Top, params.origin.y + params.translation_y);
        }
        window.set_opacity(f64::from(params.alpha));
    }
}

impl Compositor for LayerShellCompositor {
    fn screen(&self) -> Screen {
        self.screen
    }

    fn attach(&mut self, kind: SurfaceKind, params: &LayoutParams) -> Result<(), SurfaceError> {
        if !gtk4_layer_shell::is_supported() {
            return Err(SurfaceError::PermissionDenied);
        }
        if self.windows.contains_key(&kind) {
            return Err(SurfaceError::InvalidState(format!(
                "{} window already exists",
                kind.name()
            )));
        }

        let window = self.build_window(kind, params);
        match kind {
            SurfaceKind::Bubble => {
                let area = self.bubble_content(params);
                window.set_child(Some(&area));
                self.bubble_origin.set(params.origin);
            }
            SurfaceKind::Menu => window.set_child(Some(&Self::menu_content(params))),
            SurfaceKind::Scrim => window.set_child(Some(&Self::scrim_content())),
        }
        Self::place(&window, params);
        window.present();
        self.windows.insert(kind, window);
        debug!("Presented {} window", kind.name());
        Ok(())
    }

    fn update_layout(&mut self, kind: SurfaceKind, params: &LayoutParams) -> Result<(), SurfaceError> {
        let window = self
            .windows
            .get(&kind)
            .ok_or(SurfaceError::NotAttached(kind.name()))?;
        Self::place(window, params);
        if kind == SurfaceKind::Bubble {
            self.bubble_origin.set(params.origin);
        }
        Ok(())
    }

    fn detach(&mut self, kind: SurfaceKind) -> Result<(), SurfaceError> {
        let window = self
            .windows
            .remove(&kind)
            .ok_or(SurfaceError::NotAttached(kind.name()))?;
        if kind == SurfaceKind::Bubble {
            self.bubble_area = None;
        }
        window.destroy();
        Ok(())
    }

    fn is_attached(&self, kind: SurfaceKind) -> bool {
        self.windows.contains_key(&kind)
    }

    fn set_bubble_label(&mut self, text: &str) -> Result<(), SurfaceError> {
        let area = self
            .bubble_area
            .as_ref()
            .ok_or(SurfaceError::NotAttached(SurfaceKind::Bubble.name()))?;
        *self.label.borrow_mut() = text.to_string();
        area.queue_draw();
        Ok(())
    }

    fn measured_width(&self, kind: SurfaceKind) -> Option<i32> {
        self.windows
            .get(&kind)
            .map(|window| window.width())
            .filter(|width| *width > 0)
    }

    fn schedule_frame(&mut self) {
        if self.frame_pending.replace(true) {
            return;
        }
        let pending = self.frame_pending.clone();
        glib::timeout_add_local(FRAME_INTERVAL, move || {
            if tick_overlay(Instant::now()) {
                glib::ControlFlow::Continue
            } else {
                pending.set(false);
                glib::ControlFlow::Break
            }
        });
    }
}

/// Size of the first monitor, scaled by `density`.
fn detect_screen(density: f32, fallback: (i32, i32)) -> Screen {
    let geometry = gdk::Display::default()
        .and_then(|display| display.monitors().item(0))
        .and_then(|item| item.downcast::<gdk::Monitor>().ok())
        .map(|monitor| monitor.geometry());
    match geometry {
        Some(rect) => Screen::new(rect.width(), rect.height(), density),
        None => {
            warn!("No monitor reported; assuming {}x{}", fallback.0, fallback.1);
            Screen::new(fallback.0, fallback.1, density)
        }
    }
}

fn install_style() {
    let Some(display) = gdk::Display::default() else {
        warn!("No display for overlay styles");
        return;
    };
    let provider = gtk4::CssProvider::new();
    provider.load_from_data(STYLE);
    gtk4::style_context_add_provider_for_display(
        &display,
        &provider,
        gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
    );
}

/// Build the dispatcher from a compositor factory.
pub type DispatcherBuilder =
    Box<dyn FnOnce(Box<dyn FnMut() -> LayerShellCompositor>) -> UiDispatcher<LayerShellCompositor>>;

/// Run the GTK main loop until the dispatcher shuts down.
pub fn run(
    density: f32,
    fallback_screen: (i32, i32),
    build: DispatcherBuilder,
    requests: mpsc::UnboundedReceiver<UiRequest>,
) -> anyhow::Result<()> {
    let app = Application::builder().application_id(APP_ID).build();
    let startup = RefCell::new(Some((build, requests)));

    app.connect_activate(move |app| {
        let Some((build, requests)) = startup.borrow_mut().take() else {
            return;
        };
        install_style();
        let screen = detect_screen(density, fallback_screen);
        info!("Layer shell output {}x{} at density {}", screen.width, screen.height, screen.density);

        let factory_app = app.clone();
        let dispatcher = build(Box::new(move || {
            LayerShellCompositor::new(factory_app.clone(), screen)
        }));

        // The bubble may be stopped with no windows left; keep the app alive
        let hold = app.hold();
        let app = app.clone();
        glib::spawn_future_local(async move {
            service::serve(dispatcher, requests).await;
            drop(hold);
            app.quit();
        });
    });

    let exit_code = app.run_with_args::<&str>(&[]);
    if exit_code != glib::ExitCode::SUCCESS {
        anyhow::bail!("Application exited with error code");
    }
    Ok(())
}

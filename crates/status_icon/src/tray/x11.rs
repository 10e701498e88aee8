//! XEmbed system tray icons on X11.
//!
//! The icon is a small window docked with the `_NET_SYSTEM_TRAY_S{screen}` selection owner. A
//! background thread turns X events into [`TrayEvent`]s and redocks when a new tray manager
//! shows up.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use x11rb::{
    connection::Connection,
    protocol::{xproto::*, Event},
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
    CURRENT_TIME,
};

use super::*;
use crate::{error::Error, menu::Rect, types::ScrollDirection};

const ICON_SIZE: u16 = 24;
const SYSTEM_TRAY_REQUEST_DOCK: u32 = 0;
const XEMBED_MAPPED: u32 = 1;
/// Colour transparent pixels are blended against.
const BACKGROUND: [u8; 3] = [0x30, 0x30, 0x30];

x11rb::atom_manager! {
    pub TrayAtoms: TrayAtomsCookie {
        MANAGER,
        _NET_SYSTEM_TRAY_OPCODE,
        _NET_SYSTEM_TRAY_ORIENTATION,
        _NET_WM_NAME,
        _XEMBED_INFO,
        UTF8_STRING,
    }
}

fn tray_err(e: impl std::fmt::Display) -> Error {
    Error::Tray(e.to_string())
}

#[derive(Debug, Default)]
pub struct X11TrayFactory;

impl TrayFactory for X11TrayFactory {
    fn create(&self) -> Result<(Box<dyn LegacyTray>, TrayEvents)> {
        let (tray, events) = X11Tray::new()?;
        Ok((Box::new(tray), events))
    }
}

/// State shared between the tray handle and its event thread.
#[derive(Debug)]
struct Shared {
    conn: RustConnection,
    atoms: TrayAtoms,
    window: Window,
    root: Window,
    gc: Gcontext,
    depth: u8,
    selection: Atom,
    embedded: Mutex<bool>,
    /// BGRX pixels of the current image, `ICON_SIZE` squared.
    frame: Mutex<Option<Vec<u8>>>,
}

impl Shared {
    fn dock(&self) -> Result<bool> {
        let owner = self.conn.get_selection_owner(self.selection).map_err(tray_err)?.reply().map_err(tray_err)?.owner;
        if owner == x11rb::NONE {
            log::debug!("no system tray manager running");
            return Ok(false);
        }
        // learn when the manager goes away
        self.conn
            .change_window_attributes(owner, &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY))
            .map_err(tray_err)?;
        let message = ClientMessageEvent::new(
            32,
            owner,
            self.atoms._NET_SYSTEM_TRAY_OPCODE,
            [CURRENT_TIME, SYSTEM_TRAY_REQUEST_DOCK, self.window, 0, 0],
        );
        self.conn.send_event(false, owner, EventMask::NO_EVENT, message).map_err(tray_err)?;
        self.conn.flush().map_err(tray_err)?;
        log::debug!("requested docking with tray manager {:#x}", owner);
        Ok(true)
    }

    fn draw(&self) -> Result<()> {
        let frame = self.frame.lock().unwrap(); // unwrap: mutex poisoning is okay
        match frame.as_ref() {
            Some(pixels) => {
                self.conn
                    .put_image(ImageFormat::Z_PIXMAP, self.window, self.gc, ICON_SIZE, ICON_SIZE, 0, 0, 0, self.depth, pixels)
                    .map_err(tray_err)?;
            }
            None => {
                self.conn.clear_area(false, self.window, 0, 0, 0, 0).map_err(tray_err)?;
            }
        }
        self.conn.flush().map_err(tray_err)
    }

    fn geometry(&self) -> Option<TrayGeometry> {
        let translated = self.conn.translate_coordinates(self.window, self.root, 0, 0).ok()?.reply().ok()?;
        let root = self.conn.get_geometry(self.root).ok()?.reply().ok()?;
        let owner = self.conn.get_selection_owner(self.selection).ok()?.reply().ok()?.owner;
        let orientation = self
            .conn
            .get_property(false, owner, self.atoms._NET_SYSTEM_TRAY_ORIENTATION, AtomEnum::CARDINAL, 0, 1)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .and_then(|reply| reply.value32().and_then(|mut values| values.next()))
            .map(|value| if value == 1 { Orientation::Vertical } else { Orientation::Horizontal })
            .unwrap_or_default();
        Some(TrayGeometry {
            icon: Rect {
                x: translated.dst_x as i32,
                y: translated.dst_y as i32,
                width: ICON_SIZE as i32,
                height: ICON_SIZE as i32,
            },
            workarea: Rect { x: 0, y: 0, width: root.width as i32, height: root.height as i32 },
            orientation,
        })
    }

    fn set_embedded(&self, embedded: bool, events: &mpsc::UnboundedSender<TrayEvent>) {
        let mut current = self.embedded.lock().unwrap(); // unwrap: mutex poisoning is okay
        if *current != embedded {
            *current = embedded;
            let _ = events.send(TrayEvent::Embedded(embedded));
        }
    }
}

fn scroll_direction(button: u8) -> Option<ScrollDirection> {
    match button {
        4 => Some(ScrollDirection::Up),
        5 => Some(ScrollDirection::Down),
        6 => Some(ScrollDirection::Left),
        7 => Some(ScrollDirection::Right),
        _ => None,
    }
}

fn run_events(shared: Arc<Shared>, events: mpsc::UnboundedSender<TrayEvent>) {
    loop {
        let event = match shared.conn.wait_for_event() {
            Ok(event) => event,
            Err(e) => {
                log::debug!("tray connection closed: {}", e);
                return;
            }
        };
        match event {
            Event::ButtonPress(press) => match scroll_direction(press.detail) {
                Some(direction) => {
                    let _ = events.send(TrayEvent::Scroll { direction, time: press.time });
                }
                None => {
                    let geometry = shared.geometry();
                    let _ = events.send(TrayEvent::ButtonPress { button: press.detail as u32, time: press.time, geometry });
                }
            },
            Event::ButtonRelease(release) if scroll_direction(release.detail).is_none() => {
                let geometry = shared.geometry();
                let _ = events.send(TrayEvent::ButtonRelease { button: release.detail as u32, time: release.time, geometry });
            }
            Event::ReparentNotify(reparent) if reparent.window == shared.window => {
                shared.set_embedded(reparent.parent != shared.root, &events);
            }
            Event::Expose(expose) if expose.window == shared.window && expose.count == 0 => {
                if let Err(e) = shared.draw() {
                    log::warn!("failed to draw tray icon: {}", e);
                }
            }
            Event::ClientMessage(message) if message.type_ == shared.atoms.MANAGER => {
                log::debug!("a new tray manager appeared");
                if let Err(e) = shared.dock() {
                    log::warn!("failed to dock with the new tray manager: {}", e);
                }
            }
            Event::DestroyNotify(destroy) if destroy.window == shared.window => return,
            Event::DestroyNotify(_) => {
                // the tray manager went away, the icon is back on the root window
                shared.set_embedded(false, &events);
            }
            _ => {}
        }
        if events.is_closed() {
            return;
        }
    }
}

#[derive(Debug)]
pub struct X11Tray {
    shared: Arc<Shared>,
    visible: bool,
}

impl X11Tray {
    pub fn new() -> Result<(Self, TrayEvents)> {
        let (conn, screen_num) = RustConnection::connect(None).map_err(tray_err)?;
        let screen = conn.setup().roots[screen_num].clone();
        let atoms = TrayAtoms::new(&conn).map_err(tray_err)?.reply().map_err(tray_err)?;
        let selection_name = format!("_NET_SYSTEM_TRAY_S{}", screen_num);
        let selection = conn.intern_atom(false, selection_name.as_bytes()).map_err(tray_err)?.reply().map_err(tray_err)?.atom;

        let window = conn.generate_id().map_err(tray_err)?;
        conn.create_window(
            screen.root_depth,
            window,
            screen.root,
            0,
            0,
            ICON_SIZE,
            ICON_SIZE,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &CreateWindowAux::new().background_pixel(screen.black_pixel).event_mask(
                EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::STRUCTURE_NOTIFY | EventMask::EXPOSURE,
            ),
        )
        .map_err(tray_err)?;
        let gc = conn.generate_id().map_err(tray_err)?;
        conn.create_gc(gc, window, &CreateGCAux::new()).map_err(tray_err)?;
        conn.change_property32(PropMode::REPLACE, window, atoms._XEMBED_INFO, atoms._XEMBED_INFO, &[0, 0])
            .map_err(tray_err)?;
        // hear about new tray managers
        conn.change_window_attributes(screen.root, &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY))
            .map_err(tray_err)?;

        let shared = Arc::new(Shared {
            conn,
            atoms,
            window,
            root: screen.root,
            gc,
            depth: screen.root_depth,
            selection,
            embedded: Mutex::new(false),
            frame: Mutex::new(None),
        });
        shared.dock()?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("xapp-tray-events".to_owned())
            .spawn({
                let shared = shared.clone();
                move || run_events(shared, tx)
            })
            .map_err(tray_err)?;

        Ok((X11Tray { shared, visible: false }, rx))
    }

    fn load_frame(source: &TrayImage) -> Option<Vec<u8>> {
        let path = match source {
            TrayImage::File(path) => path,
            TrayImage::Themed(name) => {
                log::debug!("themed icon {:?} can't be drawn without an icon theme, leaving the icon blank", name);
                return None;
            }
        };
        let loaded = match image::open(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::warn!("failed to load tray icon {}: {}", path.display(), e);
                return None;
            }
        };
        let size = ICON_SIZE as u32;
        let rgba = loaded.resize_exact(size, size, image::imageops::FilterType::Triangle).to_rgba8();
        let mut frame = Vec::with_capacity(rgba.len());
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            let blend = |c: u8, bg: u8| ((c as u32 * a as u32 + bg as u32 * (255 - a as u32)) / 255) as u8;
            frame.extend_from_slice(&[blend(b, BACKGROUND[2]), blend(g, BACKGROUND[1]), blend(r, BACKGROUND[0]), 0]);
        }
        Some(frame)
    }
}

impl LegacyTray for X11Tray {
    fn set_image(&mut self, source: &TrayImage) -> Result<()> {
        *self.shared.frame.lock().unwrap() = X11Tray::load_frame(source); // unwrap: mutex poisoning is okay
        self.shared.draw()
    }

    fn set_tooltip(&mut self, text: &str) -> Result<()> {
        let shared = &self.shared;
        shared
            .conn
            .change_property8(PropMode::REPLACE, shared.window, shared.atoms._NET_WM_NAME, shared.atoms.UTF8_STRING, text.as_bytes())
            .map_err(tray_err)?;
        shared.conn.flush().map_err(tray_err)
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        if self.visible == visible {
            return Ok(());
        }
        self.visible = visible;
        let shared = &self.shared;
        let flags = if visible { XEMBED_MAPPED } else { 0 };
        shared
            .conn
            .change_property32(PropMode::REPLACE, shared.window, shared.atoms._XEMBED_INFO, shared.atoms._XEMBED_INFO, &[0, flags])
            .map_err(tray_err)?;
        shared.conn.flush().map_err(tray_err)
    }

    fn is_embedded(&self) -> bool {
        *self.shared.embedded.lock().unwrap() // unwrap: mutex poisoning is okay
    }
}

impl Drop for X11Tray {
    fn drop(&mut self) {
        // the event thread exits once it sees its window destroyed
        let _ = self.shared.conn.destroy_window(self.shared.window);
        let _ = self.shared.conn.flush();
    }
}

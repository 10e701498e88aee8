//! The application facing status icon.
//!
//! A [`StatusIcon`] buffers the icon's state and forwards changes to a task that owns the active
//! backend. That task runs discovery, reacts to monitors and the watcher coming and going, and turns
//! whatever the active backend receives into [`StatusIconEvent`]s.

use std::sync::{Arc, Mutex};

use futures::{stream::BoxStream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    backend::{choose_backend, ActiveBackend, Backend, FallbackBackend, IconSnapshot, NativeBackend, Availability, SniBackend},
    bus::{InboundCall, IconProperties, NameOwnerChange},
    context::{NameStatus, NativeEvent, StatusIconContext},
    event::{Listeners, StatusIconEvent},
    menu::{menu_for_button, MenuPlacement, MenuRef},
    names,
    tray::{click_position, TrayEvent},
    types::{button, should_send_activate, BackendType, PanelPosition, ScrollDirection, StatusIconState, CURRENT_TIME},
};

#[derive(Debug, Default)]
struct IconData {
    props: IconProperties,
    primary_menu: Option<MenuRef>,
    secondary_menu: Option<MenuRef>,
    icon_size: i32,
    backend: BackendType,
}

impl IconData {
    fn snapshot(&self) -> IconSnapshot {
        IconSnapshot {
            props: self.props.clone(),
            primary_menu: self.primary_menu.clone(),
            secondary_menu: self.secondary_menu.clone(),
            icon_size: self.icon_size,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    data: Mutex<IconData>,
    listeners: Listeners,
    /// Token of the running discovery. Handles cancel it so a refresh or close never waits on a
    /// registration that is still in flight.
    discovery: Mutex<CancellationToken>,
}

impl Shared {
    fn snapshot(&self) -> IconSnapshot {
        self.data.lock().unwrap().snapshot() // unwrap: mutex poisoning is okay
    }

    fn discovery_token(&self) -> CancellationToken {
        self.discovery.lock().unwrap().clone() // unwrap: mutex poisoning is okay
    }

    fn cancel_discovery(&self) {
        self.discovery.lock().unwrap().cancel(); // unwrap: mutex poisoning is okay
    }

    /// Cancel the running discovery and hand out the token of the next one.
    fn restart_discovery(&self) -> CancellationToken {
        let mut token = self.discovery.lock().unwrap(); // unwrap: mutex poisoning is okay
        token.cancel();
        *token = CancellationToken::new();
        token.clone()
    }

    fn set_backend(&self, backend: BackendType) {
        self.data.lock().unwrap().backend = backend; // unwrap: mutex poisoning is okay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Name,
    IconName,
    TooltipText,
    Label,
    Visible,
    Metadata,
    Menus,
}

#[derive(Debug)]
enum Command {
    Changed(Change),
    Refresh,
    Close(oneshot::Sender<()>),
}

/// A status icon of this application.
///
/// Dropping it tears down the active backend in the background, [`StatusIcon::close`] does the
/// same and waits for it.
#[derive(Debug)]
pub struct StatusIcon {
    ctx: StatusIconContext,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl StatusIcon {
    /// Create a visible icon named after the program and start looking for a backend.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: &StatusIconContext) -> Self {
        let name = ctx.program_name().to_owned();
        StatusIcon::with_name(ctx, name)
    }

    pub fn with_name(ctx: &StatusIconContext, name: impl Into<String>) -> Self {
        let shared = Arc::new(Shared::default());
        {
            let mut data = shared.data.lock().unwrap(); // unwrap: mutex poisoning is okay
            data.props.name = name.into();
            data.props.visible = true;
        }
        let (commands, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(IconActor::new(ctx.clone(), shared.clone(), commands_rx).run());
        StatusIcon { ctx: ctx.clone(), shared, commands }
    }

    fn update(&self, change: Change, apply: impl FnOnce(&mut IconData) -> bool) {
        let changed = apply(&mut self.shared.data.lock().unwrap()); // unwrap: mutex poisoning is okay
        if changed {
            let _ = self.commands.send(Command::Changed(change));
        }
    }

    fn read<T>(&self, f: impl FnOnce(&IconData) -> T) -> T {
        f(&self.shared.data.lock().unwrap()) // unwrap: mutex poisoning is okay
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.update(Change::Name, |data| replace(&mut data.props.name, name));
    }

    /// Set the icon, either a theme icon name or an absolute file path.
    pub fn set_icon_name(&self, icon_name: impl Into<String>) {
        let icon_name = icon_name.into();
        self.update(Change::IconName, |data| replace(&mut data.props.icon_name, icon_name));
    }

    pub fn set_tooltip_text(&self, tooltip_text: impl Into<String>) {
        let tooltip_text = tooltip_text.into();
        self.update(Change::TooltipText, |data| replace(&mut data.props.tooltip_text, tooltip_text));
    }

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.update(Change::Label, |data| replace(&mut data.props.label, label));
    }

    pub fn set_visible(&self, visible: bool) {
        self.update(Change::Visible, |data| replace(&mut data.props.visible, visible));
    }

    /// Opaque hints for consumers, usually a json object.
    pub fn set_metadata(&self, metadata: impl Into<String>) {
        let metadata = metadata.into();
        self.update(Change::Metadata, |data| replace(&mut data.props.metadata, metadata));
    }

    pub fn set_primary_menu(&self, menu: Option<MenuRef>) {
        self.update(Change::Menus, |data| {
            let changed = !crate::menu::same_menu(data.primary_menu.as_ref(), menu.as_ref());
            data.primary_menu = menu;
            changed
        });
    }

    pub fn set_secondary_menu(&self, menu: Option<MenuRef>) {
        self.update(Change::Menus, |data| {
            let changed = !crate::menu::same_menu(data.secondary_menu.as_ref(), menu.as_ref());
            data.secondary_menu = menu;
            changed
        });
    }

    pub fn name(&self) -> String {
        self.read(|data| data.props.name.clone())
    }

    pub fn icon_name(&self) -> String {
        self.read(|data| data.props.icon_name.clone())
    }

    pub fn tooltip_text(&self) -> String {
        self.read(|data| data.props.tooltip_text.clone())
    }

    pub fn label(&self) -> String {
        self.read(|data| data.props.label.clone())
    }

    pub fn visible(&self) -> bool {
        self.read(|data| data.props.visible)
    }

    pub fn metadata(&self) -> String {
        self.read(|data| data.props.metadata.clone())
    }

    pub fn primary_menu(&self) -> Option<MenuRef> {
        self.read(|data| data.primary_menu.clone())
    }

    pub fn secondary_menu(&self) -> Option<MenuRef> {
        self.read(|data| data.secondary_menu.clone())
    }

    /// Icon size requested by the consumer, 0 while none did.
    pub fn icon_size(&self) -> i32 {
        self.read(|data| data.icon_size)
    }

    /// The backend currently serving this icon.
    pub fn backend(&self) -> BackendType {
        self.read(|data| data.backend)
    }

    /// The process wide icon state.
    pub fn state(&self) -> StatusIconState {
        self.ctx.state()
    }

    pub fn context(&self) -> &StatusIconContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StatusIconEvent> {
        self.shared.listeners.subscribe()
    }

    /// Run backend discovery again, abandoning one that is still running.
    pub fn refresh(&self) {
        self.shared.cancel_discovery();
        let _ = self.commands.send(Command::Refresh);
    }

    /// Tear down the active backend and wait until that is done.
    pub async fn close(self) {
        self.shared.cancel_discovery();
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for StatusIcon {
    fn drop(&mut self) {
        self.shared.cancel_discovery();
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Names owned by native icon consumers, or the watcher.
async fn watch_owners(ctx: &StatusIconContext, namespace: &str) -> BoxStream<'static, NameOwnerChange> {
    match ctx.bus().watch_name_owners(namespace).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("failed to watch owners of {}: {}", namespace, e);
            futures::stream::pending().boxed()
        }
    }
}

/// Look for consumers of native icons and for the watcher.
async fn check_availability(ctx: &StatusIconContext) -> Availability {
    let monitors = match ctx.any_monitors().await {
        Ok(monitors) => monitors,
        Err(e) => {
            log::warn!("failed to look for status icon monitors: {}", e);
            false
        }
    };
    let watcher = ctx.allow_sni()
        && match tokio::time::timeout(ctx.list_names_timeout(), ctx.bus().name_has_owner(names::WATCHER_BUS)).await {
            Ok(Ok(present)) => present,
            Ok(Err(e)) => {
                log::debug!("failed to look for the status notifier watcher: {}", e);
                false
            }
            Err(_) => {
                log::debug!("timed out looking for the status notifier watcher");
                false
            }
        };
    log::debug!("discovery found monitors: {}, watcher: {}", monitors, watcher);
    Availability { monitors, watcher }
}

struct IconActor {
    ctx: StatusIconContext,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    calls_tx: mpsc::UnboundedSender<InboundCall>,
    calls: mpsc::UnboundedReceiver<InboundCall>,
    native_events: broadcast::Receiver<NativeEvent>,
    availability_tx: mpsc::UnboundedSender<(u64, Availability)>,
    availability: mpsc::UnboundedReceiver<(u64, Availability)>,
    menus_closed_tx: mpsc::UnboundedSender<u32>,
    menus_closed: mpsc::UnboundedReceiver<u32>,
    backend: ActiveBackend,
    /// Bumped for every discovery so results of superseded ones are dropped.
    generation: u64,
    fail_counter: u32,
    sni_attempted: bool,
    have_button_press: bool,
}

impl IconActor {
    fn new(ctx: StatusIconContext, shared: Arc<Shared>, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (availability_tx, availability) = mpsc::unbounded_channel();
        let (menus_closed_tx, menus_closed) = mpsc::unbounded_channel();
        IconActor {
            native_events: ctx.subscribe_native(),
            ctx,
            shared,
            commands,
            calls_tx,
            calls,
            availability_tx,
            availability,
            menus_closed_tx,
            menus_closed,
            backend: ActiveBackend::None,
            generation: 0,
            fail_counter: 0,
            sni_attempted: false,
            have_button_press: false,
        }
    }

    async fn run(mut self) {
        let mut monitor_owners = watch_owners(&self.ctx, names::MONITOR_NAME_PREFIX).await;
        let mut watcher_owners = if self.ctx.allow_sni() {
            watch_owners(&self.ctx, names::WATCHER_BUS).await
        } else {
            futures::stream::pending().boxed()
        };
        self.start_discovery();

        let close_ack = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Changed(change)) => self.push_change(change).await,
                    Some(Command::Refresh) => self.start_discovery(),
                    Some(Command::Close(ack)) => break Some(ack),
                    None => break None,
                },
                Some(call) = self.calls.recv() => self.handle_call(call).await,
                Some(change) = monitor_owners.next() => {
                    log::debug!("monitor {} {}", change.name, if change.appeared() { "appeared" } else { "vanished" });
                    self.start_discovery();
                }
                Some(change) = watcher_owners.next() => self.watcher_changed(change).await,
                event = self.native_events.recv() => match event {
                    Ok(NativeEvent::NameLost(name)) => self.name_lost(&name),
                    Err(broadcast::error::RecvError::Lagged(_)) => self.start_discovery(),
                    Err(broadcast::error::RecvError::Closed) => {}
                },
                Some((generation, found)) = self.availability.recv() => {
                    if generation == self.generation {
                        self.apply_availability(found).await;
                    } else {
                        log::debug!("dropping the result of a superseded discovery");
                    }
                }
                Some(button) = self.menus_closed.recv() => {
                    if let ActiveBackend::Native(native) = &mut self.backend {
                        native.set_menu_open(button, false).await;
                    }
                }
                Some(event) = self.backend.next_tray_event() => self.handle_tray_event(event).await,
            }
        };

        self.shared.cancel_discovery();
        self.backend.take_down().await;
        self.shared.set_backend(BackendType::None);
        if let Some(ack) = close_ack {
            let _ = ack.send(());
        }
    }

    fn emit(&self, event: StatusIconEvent) {
        self.shared.listeners.emit(event);
    }

    fn set_state(&self, state: StatusIconState) {
        self.ctx.set_state(state);
        self.emit(StatusIconEvent::StateChanged(state));
    }

    fn install(&mut self, backend: ActiveBackend) {
        self.shared.set_backend(backend.kind());
        self.backend = backend;
    }

    /// Cancel whatever discovery is running and start a new one.
    fn start_discovery(&mut self) {
        let token = self.shared.restart_discovery();
        self.generation += 1;

        let (ctx, availability, generation) = (self.ctx.clone(), self.availability_tx.clone(), self.generation);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                found = check_availability(&ctx) => {
                    let _ = availability.send((generation, found));
                }
            }
        });
    }

    async fn apply_availability(&mut self, found: Availability) {
        loop {
            let allow_sni = self.ctx.allow_sni() && !self.sni_attempted;
            let settled = match choose_backend(found, self.fail_counter, allow_sni) {
                BackendType::Native => self.try_native().await,
                BackendType::Sni => self.try_sni().await,
                _ => {
                    self.use_fallback().await;
                    true
                }
            };
            if settled {
                break;
            }
        }
    }

    async fn try_native(&mut self) -> bool {
        let snapshot = self.shared.snapshot();
        if !matches!(self.backend, ActiveBackend::Native(_)) {
            self.backend.take_down().await;
            match NativeBackend::init(&self.ctx, &snapshot, self.calls_tx.clone()).await {
                Ok(native) => self.install(ActiveBackend::Native(native)),
                Err(e) => {
                    log::warn!("failed to export native icon: {}", e);
                    self.shared.set_backend(BackendType::None);
                    self.fail_counter += 1;
                    return false;
                }
            }
        }

        let owner_name = names::native_owner_name(&snapshot.props.name, self.ctx.program_name());
        match self.ctx.own_name(&owner_name).await {
            Ok(NameStatus::Acquired | NameStatus::AlreadyOwned) => {
                self.fail_counter = 0;
                if let Some(ops) = self.backend.ops() {
                    ops.sync(&snapshot).await;
                }
                self.ctx.record_native_success();
                log::debug!("icon {} is live on the native protocol", snapshot.props.name);
                self.set_state(StatusIconState::Native);
                true
            }
            status => {
                match status {
                    Err(e) => log::warn!("failed to own {}: {}", owner_name, e),
                    _ => log::warn!("{} is not available", owner_name),
                }
                self.fail_counter += 1;
                self.backend.take_down().await;
                self.shared.set_backend(BackendType::None);
                false
            }
        }
    }

    async fn try_sni(&mut self) -> bool {
        let snapshot = self.shared.snapshot();
        if let ActiveBackend::Sni(sni) = &mut self.backend {
            sni.sync(&snapshot).await;
            return true;
        }

        self.backend.take_down().await;
        self.shared.set_backend(BackendType::None);
        let token = self.shared.discovery_token();
        match SniBackend::init(&self.ctx, &snapshot, self.calls_tx.clone(), &token).await {
            Ok(mut sni) => {
                sni.sync(&snapshot).await;
                self.install(ActiveBackend::Sni(sni));
                self.set_state(StatusIconState::Native);
                true
            }
            // a newer discovery or a close takes over from here
            Err(e) if e.is_cancelled() => {
                log::debug!("status notifier registration was superseded");
                true
            }
            Err(e) => {
                log::warn!("status notifier registration failed: {}", e);
                self.sni_attempted = true;
                false
            }
        }
    }

    async fn use_fallback(&mut self) {
        let snapshot = self.shared.snapshot();
        if let ActiveBackend::Fallback(fallback) = &mut self.backend {
            fallback.sync(&snapshot).await;
            return;
        }

        self.backend.take_down().await;
        let mut fallback = FallbackBackend::init(self.ctx.tray_factory());
        fallback.sync(&snapshot).await;
        let state = if fallback.is_embedded() { StatusIconState::Fallback } else { StatusIconState::NoSupport };
        self.install(ActiveBackend::Fallback(fallback));
        self.set_state(state);
    }

    async fn watcher_changed(&mut self, change: NameOwnerChange) {
        if change.name != names::WATCHER_BUS {
            return;
        }
        if change.appeared() {
            log::debug!("status notifier watcher appeared");
            self.sni_attempted = false;
            if matches!(self.backend, ActiveBackend::Fallback(_) | ActiveBackend::None) {
                self.start_discovery();
            }
        } else if matches!(self.backend, ActiveBackend::Sni(_)) {
            log::debug!("status notifier watcher vanished, switching to the fallback");
            self.shared.cancel_discovery();
            self.use_fallback().await;
        }
    }

    fn name_lost(&mut self, name: &str) {
        if matches!(self.backend, ActiveBackend::Native(_)) {
            log::debug!("native name {} lost, looking for a backend again", name);
            self.fail_counter += 1;
            self.start_discovery();
        }
    }

    async fn push_change(&mut self, change: Change) {
        let snapshot = self.shared.snapshot();
        let Some(ops) = self.backend.ops() else { return };
        match change {
            Change::Name => ops.set_name(&snapshot).await,
            Change::IconName => ops.set_icon_name(&snapshot).await,
            Change::TooltipText => ops.set_tooltip_text(&snapshot).await,
            Change::Label => ops.set_label(&snapshot).await,
            Change::Visible => ops.set_visible(&snapshot).await,
            Change::Metadata => ops.set_metadata(&snapshot).await,
            Change::Menus => ops.menus_changed(&snapshot).await,
        }
    }

    /// Show the menu for `button`, if there is one, and report when it closes.
    async fn popup_menu(&mut self, x: i32, y: i32, button: u32, time: u32, position: PanelPosition) {
        let (menu, icon_size) = {
            let data = self.shared.data.lock().unwrap(); // unwrap: mutex poisoning is okay
            (menu_for_button(button, data.primary_menu.as_ref(), data.secondary_menu.as_ref()).cloned(), data.icon_size)
        };
        let Some(menu) = menu else { return };

        let icon_size = if icon_size > 0 { icon_size } else { crate::backend::sni::DEFAULT_ICON_SIZE as i32 };
        let placement = MenuPlacement::for_click(x, y, icon_size, position, button, time);
        log::debug!("popping up {} menu at {:?}", button::name(button), placement.origin);

        if let ActiveBackend::Native(native) = &mut self.backend {
            native.set_menu_open(button, true).await;
        }
        let closed = self.menus_closed_tx.clone();
        tokio::spawn(async move {
            menu.popup(placement).await;
            let _ = closed.send(button);
        });
    }

    async fn handle_call(&mut self, call: InboundCall) {
        match call {
            InboundCall::ButtonPress { x, y, button, time, panel_position } => {
                log::debug!("button press from monitor: {},{} {} at {}", x, y, button::name(button), panel_position);
                self.have_button_press = true;
                self.emit(StatusIconEvent::ButtonPress { x, y, button, time, panel_position });
            }
            InboundCall::ButtonRelease { x, y, button, time, panel_position } => {
                log::debug!("button release from monitor: {},{} {} at {}", x, y, button::name(button), panel_position);
                if should_send_activate(button, self.have_button_press) {
                    self.emit(StatusIconEvent::Activate { button, time });
                }
                if self.have_button_press {
                    self.popup_menu(x, y, button, time, panel_position).await;
                    self.emit(StatusIconEvent::ButtonRelease { x, y, button, time, panel_position });
                }
                self.have_button_press = false;
            }
            InboundCall::Scroll { delta, direction, time } => {
                self.emit(StatusIconEvent::Scroll { delta, direction, time });
            }
            InboundCall::IconSizeChanged(size) => {
                log::debug!("consumer requested icon size {}", size);
                self.shared.data.lock().unwrap().icon_size = size; // unwrap: mutex poisoning is okay
            }
            InboundCall::SniActivate { x, y } => self.sni_click(x, y, button::PRIMARY),
            InboundCall::SniSecondaryActivate { x, y } => self.sni_click(x, y, button::MIDDLE),
            InboundCall::SniContextMenu { x, y } => self.sni_click(x, y, button::SECONDARY),
            InboundCall::SniScroll { delta, orientation } => {
                let direction = ScrollDirection::from_sni(delta, &orientation);
                self.emit(StatusIconEvent::Scroll { delta: delta.abs(), direction, time: CURRENT_TIME });
            }
        }
    }

    /// SNI hosts only report whole clicks.
    fn sni_click(&mut self, x: i32, y: i32, button: u32) {
        let panel_position = PanelPosition::Top;
        self.emit(StatusIconEvent::ButtonPress { x, y, button, time: CURRENT_TIME, panel_position });
        self.emit(StatusIconEvent::ButtonRelease { x, y, button, time: CURRENT_TIME, panel_position });
        if should_send_activate(button, true) {
            self.emit(StatusIconEvent::Activate { button, time: CURRENT_TIME });
        }
    }

    async fn handle_tray_event(&mut self, event: TrayEvent) {
        match event {
            TrayEvent::ButtonPress { button, time, geometry } => {
                let (x, y, panel_position) = click_position(geometry.as_ref());
                self.have_button_press = true;
                self.emit(StatusIconEvent::ButtonPress { x, y, button, time, panel_position });
            }
            TrayEvent::ButtonRelease { button, time, geometry } => {
                let (x, y, panel_position) = click_position(geometry.as_ref());
                if should_send_activate(button, self.have_button_press) {
                    self.emit(StatusIconEvent::Activate { button, time });
                }
                self.popup_menu(x, y, button, time, panel_position).await;
                self.have_button_press = false;
                self.emit(StatusIconEvent::ButtonRelease { x, y, button, time, panel_position });
            }
            TrayEvent::Scroll { direction, time } => {
                self.emit(StatusIconEvent::Scroll { delta: TrayEvent::scroll_delta(direction), direction, time });
            }
            TrayEvent::Embedded(embedded) => {
                log::debug!("legacy tray icon {}", if embedded { "embedded" } else { "no longer embedded" });
                self.set_state(if embedded { StatusIconState::Fallback } else { StatusIconState::NoSupport });
            }
        }
    }
}

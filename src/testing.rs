//! Test doubles
//!
//! A recording window system, recording toolkit peers and a scripted input
//! method, plus a harness wiring them into a `ContextManager`.

use anyhow::{Result, bail};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::backend::{
    BackendEvent, Cursor, Icon, KeyboardMapping, NativeKind, ShapeKind, SizeHints, WindowChanges, WindowSystem,
};
use crate::config::Config;
use crate::context::{
    ContextId, ContextManager, FrameType, ImeFilter, InputMethod, InputMethodFactory, Request,
    RequestQueue, WindowType,
};
use crate::event::{KeyInput, NativeEvent, NativeState, NativeWindow};
use crate::shared::{FrameExtents, Geometry};
use crate::toolkit::{
    FocusChange, InputMethodEvent, KeyEvent, MouseEvent, ScrollEvent, View, ViewChange, ViewPeer,
    WindowLevel, WindowPeer, WindowStateChange,
};

/// A window-system request recorded by `MockSystem`
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateWindow(NativeWindow, NativeKind),
    DestroyWindow(NativeWindow),
    Show(NativeWindow),
    Hide(NativeWindow),
    MoveResize(NativeWindow, WindowChanges),
    Configure(NativeWindow, WindowChanges),
    SetSizeHints(NativeWindow, SizeHints),
    SetSizeRequest(NativeWindow, i32, i32),
    SetTransientFor(NativeWindow, Option<NativeWindow>),
    SetModal(NativeWindow, bool),
    SetTitle(NativeWindow, String),
    SetOpacity(NativeWindow, f64),
    SetIcon(NativeWindow, bool),
    SetBackground(NativeWindow),
    SetKeepAbove(NativeWindow, bool),
    SetIconified(NativeWindow, bool),
    SetMaximized(NativeWindow, bool),
    SetFullscreen(NativeWindow, bool),
    SetAcceptFocus(NativeWindow, bool),
    Present(NativeWindow),
    Restack(NativeWindow, bool),
    FocusWidget(NativeWindow),
    GrabPointer(NativeWindow, Cursor, bool),
    UngrabPointer,
    SetCursor(NativeWindow, Cursor),
    RequestFrameExtents(NativeWindow),
    DrawImage(NativeWindow, u32, u32),
    CreateMask(NativeWindow, u32, u32),
    FreeMask(u32),
    ApplyShapeMask(NativeWindow, ShapeKind),
}

struct MockState {
    calls: Vec<Call>,
    next_window: u32,
    next_mask: u32,
    visible: HashSet<NativeWindow>,
    sizes: HashMap<NativeWindow, (i32, i32)>,
    origins: HashMap<NativeWindow, (i32, i32)>,
    parents: HashMap<NativeWindow, NativeWindow>,
    cursors: HashMap<NativeWindow, Cursor>,
    extents: HashMap<NativeWindow, FrameExtents>,
    grabbed: Option<NativeWindow>,
    refuse_grabs: bool,
    window_at_pointer: Option<NativeWindow>,
    monitor: Option<i64>,
    composited: bool,
}

/// Recording window system; clones share state
#[derive(Clone)]
pub struct MockSystem(Rc<RefCell<MockState>>);

/// Stand-in for a window of ours under the pointer
const POINTER_WINDOW: NativeWindow = NativeWindow(0x1);

impl MockSystem {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(MockState {
            calls: Vec::new(),
            next_window: 0x0200_0001,
            next_mask: 0x0300_0001,
            visible: HashSet::new(),
            sizes: HashMap::new(),
            origins: HashMap::new(),
            parents: HashMap::new(),
            cursors: HashMap::new(),
            extents: HashMap::new(),
            grabbed: None,
            refuse_grabs: false,
            window_at_pointer: Some(POINTER_WINDOW),
            monitor: Some(0),
            composited: false,
        })))
    }

    fn record(&self, call: Call) {
        self.0.borrow_mut().calls.push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn grabbed_window(&self) -> Option<NativeWindow> {
        self.0.borrow().grabbed
    }

    pub fn refuse_grabs(&self, refuse: bool) {
        self.0.borrow_mut().refuse_grabs = refuse;
    }

    pub fn is_visible_window(&self, window: NativeWindow) -> bool {
        self.0.borrow().visible.contains(&window)
    }

    pub fn set_window_at_pointer(&self, window: Option<NativeWindow>) {
        self.0.borrow_mut().window_at_pointer = window;
    }

    pub fn set_size(&self, window: NativeWindow, width: i32, height: i32) {
        self.0.borrow_mut().sizes.insert(window, (width, height));
    }

    pub fn set_origin(&self, window: NativeWindow, x: i32, y: i32) {
        self.0.borrow_mut().origins.insert(window, (x, y));
    }

    pub fn set_frame_extents(&self, window: NativeWindow, extents: Option<FrameExtents>) {
        let mut state = self.0.borrow_mut();
        match extents {
            Some(extents) => state.extents.insert(window, extents),
            None => state.extents.remove(&window),
        };
    }

    pub fn set_monitor(&self, monitor: Option<i64>) {
        self.0.borrow_mut().monitor = monitor;
    }

    pub fn set_composited(&self, composited: bool) {
        self.0.borrow_mut().composited = composited;
    }
}

/// A layout with `a`/`A` on keycode 38 and `Shift_L` on keycode 50
fn test_keyboard_mapping() -> KeyboardMapping {
    let min_keycode = 8u8;
    let per_keycode = 2;
    let mut keysyms = vec![0u32; (64 - usize::from(min_keycode)) * per_keycode];
    let mut set = |keycode: u8, syms: [u32; 2]| {
        let start = usize::from(keycode - min_keycode) * per_keycode;
        keysyms[start..start + per_keycode].copy_from_slice(&syms);
    };
    set(38, [0x61, 0x41]);
    set(50, [0xffe1, 0]);
    KeyboardMapping {
        min_keycode,
        keysyms_per_keycode: per_keycode,
        keysyms,
    }
}

impl WindowSystem for MockSystem {
    fn create_window(&self, kind: NativeKind) -> Result<NativeWindow> {
        let mut state = self.0.borrow_mut();
        let window = NativeWindow(state.next_window);
        state.next_window += 1;
        if let NativeKind::Child { parent } = kind {
            state.parents.insert(window, parent);
        }
        state.calls.push(Call::CreateWindow(window, kind));
        Ok(window)
    }

    fn destroy_window(&self, window: NativeWindow) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.visible.remove(&window);
        state.calls.push(Call::DestroyWindow(window));
        Ok(())
    }

    fn show(&self, window: NativeWindow) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.visible.insert(window);
        state.calls.push(Call::Show(window));
        Ok(())
    }

    fn hide(&self, window: NativeWindow) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.visible.remove(&window);
        state.calls.push(Call::Hide(window));
        Ok(())
    }

    fn is_visible(&self, window: NativeWindow) -> bool {
        self.is_visible_window(window)
    }

    fn size(&self, window: NativeWindow) -> Result<(i32, i32)> {
        Ok(self.0.borrow().sizes.get(&window).copied().unwrap_or((0, 0)))
    }

    fn decorated_position(&self, window: NativeWindow) -> Result<(i32, i32)> {
        let (x, y) = self.origin(window)?;
        let extents = self.frame_extents(window)?.unwrap_or_default();
        Ok((x - extents.left, y - extents.top))
    }

    fn origin(&self, window: NativeWindow) -> Result<(i32, i32)> {
        Ok(self.0.borrow().origins.get(&window).copied().unwrap_or((0, 0)))
    }

    fn move_resize(&self, window: NativeWindow, changes: &WindowChanges) -> Result<()> {
        self.record(Call::MoveResize(window, *changes));
        Ok(())
    }

    fn configure(&self, window: NativeWindow, changes: &WindowChanges) -> Result<()> {
        self.record(Call::Configure(window, *changes));
        Ok(())
    }

    fn set_size_hints(&self, window: NativeWindow, hints: &SizeHints) -> Result<()> {
        self.record(Call::SetSizeHints(window, *hints));
        Ok(())
    }

    fn set_size_request(&self, window: NativeWindow, width: i32, height: i32) -> Result<()> {
        self.record(Call::SetSizeRequest(window, width, height));
        Ok(())
    }

    fn set_transient_for(&self, window: NativeWindow, parent: Option<NativeWindow>) -> Result<()> {
        self.record(Call::SetTransientFor(window, parent));
        Ok(())
    }

    fn set_modal(&self, window: NativeWindow, modal: bool) -> Result<()> {
        self.record(Call::SetModal(window, modal));
        Ok(())
    }

    fn set_title(&self, window: NativeWindow, title: &str) -> Result<()> {
        self.record(Call::SetTitle(window, title.to_string()));
        Ok(())
    }

    fn set_opacity(&self, window: NativeWindow, alpha: f64) -> Result<()> {
        self.record(Call::SetOpacity(window, alpha));
        Ok(())
    }

    fn set_icon(&self, window: NativeWindow, icon: Option<&Icon>) -> Result<()> {
        self.record(Call::SetIcon(window, icon.is_some()));
        Ok(())
    }

    fn set_background(&self, window: NativeWindow, _rgb: [f32; 3]) -> Result<()> {
        self.record(Call::SetBackground(window));
        Ok(())
    }

    fn set_keep_above(&self, window: NativeWindow, above: bool) -> Result<()> {
        self.record(Call::SetKeepAbove(window, above));
        Ok(())
    }

    fn set_iconified(&self, window: NativeWindow, iconified: bool) -> Result<()> {
        self.record(Call::SetIconified(window, iconified));
        Ok(())
    }

    fn set_maximized(&self, window: NativeWindow, maximized: bool) -> Result<()> {
        self.record(Call::SetMaximized(window, maximized));
        Ok(())
    }

    fn set_fullscreen(&self, window: NativeWindow, fullscreen: bool) -> Result<()> {
        self.record(Call::SetFullscreen(window, fullscreen));
        Ok(())
    }

    fn set_accept_focus(&self, window: NativeWindow, accept: bool) -> Result<()> {
        self.record(Call::SetAcceptFocus(window, accept));
        Ok(())
    }

    fn present(&self, window: NativeWindow) -> Result<()> {
        self.record(Call::Present(window));
        Ok(())
    }

    fn restack(&self, window: NativeWindow, to_front: bool) -> Result<()> {
        self.record(Call::Restack(window, to_front));
        Ok(())
    }

    fn focus_widget(&self, window: NativeWindow) -> Result<()> {
        self.record(Call::FocusWidget(window));
        Ok(())
    }

    fn toplevel_of(&self, window: NativeWindow) -> Result<NativeWindow> {
        let state = self.0.borrow();
        let mut current = window;
        while let Some(&parent) = state.parents.get(&current) {
            current = parent;
        }
        Ok(current)
    }

    fn grab_pointer(&self, window: NativeWindow, cursor: Cursor, owner_events: bool) -> Result<bool> {
        let mut state = self.0.borrow_mut();
        state.calls.push(Call::GrabPointer(window, cursor, owner_events));
        if state.refuse_grabs {
            return Ok(false);
        }
        state.grabbed = Some(window);
        Ok(true)
    }

    fn ungrab_pointer(&self) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.grabbed = None;
        state.calls.push(Call::UngrabPointer);
        Ok(())
    }

    fn pointer_grabbed(&self) -> bool {
        self.0.borrow().grabbed.is_some()
    }

    fn window_at_pointer(&self) -> Result<Option<NativeWindow>> {
        Ok(self.0.borrow().window_at_pointer)
    }

    fn cursor(&self, window: NativeWindow) -> Cursor {
        self.0.borrow().cursors.get(&window).copied().unwrap_or_default()
    }

    fn set_cursor(&self, window: NativeWindow, cursor: Cursor) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.cursors.insert(window, cursor);
        state.calls.push(Call::SetCursor(window, cursor));
        Ok(())
    }

    fn request_frame_extents(&self, window: NativeWindow) -> Result<()> {
        self.record(Call::RequestFrameExtents(window));
        Ok(())
    }

    fn frame_extents(&self, window: NativeWindow) -> Result<Option<FrameExtents>> {
        Ok(self.0.borrow().extents.get(&window).copied())
    }

    fn monitor_at(&self, _x: i32, _y: i32) -> Result<Option<i64>> {
        Ok(self.0.borrow().monitor)
    }

    fn is_composited(&self) -> Result<bool> {
        Ok(self.0.borrow().composited)
    }

    fn draw_image(&self, window: NativeWindow, data: &[u8], width: u32, height: u32) -> Result<()> {
        if data.len() < (width * height * 4) as usize {
            bail!("image buffer too short for {}x{}", width, height);
        }
        self.record(Call::DrawImage(window, width, height));
        Ok(())
    }

    fn create_mask(&self, window: NativeWindow, width: u32, height: u32) -> Result<u32> {
        let mut state = self.0.borrow_mut();
        let mask = state.next_mask;
        state.next_mask += 1;
        state.calls.push(Call::CreateMask(window, width, height));
        Ok(mask)
    }

    fn free_mask(&self, mask: u32) -> Result<()> {
        self.record(Call::FreeMask(mask));
        Ok(())
    }

    fn apply_shape_mask(
        &self,
        window: NativeWindow,
        _mask: u32,
        _data: &[u8],
        _width: u32,
        _height: u32,
        kind: ShapeKind,
    ) -> Result<()> {
        self.record(Call::ApplyShapeMask(window, kind));
        Ok(())
    }

    fn keyboard_mapping(&self) -> Result<KeyboardMapping> {
        Ok(test_keyboard_mapping())
    }
}

/// A window-peer notification
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Focus(FocusChange),
    FocusDisabled,
    FocusUngrab,
    Resize(i32, i32),
    Move(i32, i32),
    MoveToScreen(i64, i64),
    State(WindowStateChange),
    Level(WindowLevel),
    Close,
    Destroy,
    Delegate(Option<ContextId>),
}

#[derive(Default)]
struct PeerState {
    events: Vec<PeerEvent>,
    disabled: bool,
    on_close: Vec<Request>,
    requests: Option<RequestQueue>,
}

/// Shared log of every recording window peer
#[derive(Clone, Default)]
pub struct PeerLog(Rc<RefCell<PeerState>>);

impl PeerLog {
    pub fn events(&self) -> Vec<PeerEvent> {
        self.0.borrow().events.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().events.clear();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.0.borrow_mut().disabled = !enabled;
    }

    /// Queues `request` whenever a close is reported
    pub fn on_close(&self, request: Request) {
        self.0.borrow_mut().on_close.push(request);
    }

    fn connect(&self, requests: RequestQueue) {
        self.0.borrow_mut().requests = Some(requests);
    }

    fn record(&self, event: PeerEvent) -> Result<()> {
        self.0.borrow_mut().events.push(event);
        Ok(())
    }
}

pub struct RecordingPeer(PeerLog);

impl WindowPeer for RecordingPeer {
    fn is_enabled(&self) -> Result<bool> {
        Ok(!self.0.0.borrow().disabled)
    }

    fn notify_focus(&self, change: FocusChange) -> Result<()> {
        self.0.record(PeerEvent::Focus(change))
    }

    fn notify_focus_disabled(&self) -> Result<()> {
        self.0.record(PeerEvent::FocusDisabled)
    }

    fn notify_focus_ungrab(&self) -> Result<()> {
        self.0.record(PeerEvent::FocusUngrab)
    }

    fn notify_resize(&self, width: i32, height: i32) -> Result<()> {
        self.0.record(PeerEvent::Resize(width, height))
    }

    fn notify_move(&self, x: i32, y: i32) -> Result<()> {
        self.0.record(PeerEvent::Move(x, y))
    }

    fn notify_move_to_screen(&self, from: i64, to: i64) -> Result<()> {
        self.0.record(PeerEvent::MoveToScreen(from, to))
    }

    fn notify_state(&self, change: WindowStateChange) -> Result<()> {
        self.0.record(PeerEvent::State(change))
    }

    fn notify_level(&self, level: WindowLevel) -> Result<()> {
        self.0.record(PeerEvent::Level(level))
    }

    fn notify_close(&self) -> Result<()> {
        self.0.record(PeerEvent::Close)?;
        let state = self.0.0.borrow();
        if let Some(queue) = &state.requests {
            for request in &state.on_close {
                queue.push(*request);
            }
        }
        Ok(())
    }

    fn notify_destroy(&self) -> Result<()> {
        self.0.record(PeerEvent::Destroy)
    }

    fn notify_delegate(&self, delegate: Option<ContextId>) -> Result<()> {
        self.0.record(PeerEvent::Delegate(delegate))
    }
}

/// A view-peer notification
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Resize(i32, i32),
    Repaint(Geometry),
    Mouse(MouseEvent),
    Menu(i32, i32, i32, i32, bool),
    Scroll(ScrollEvent),
    Key(KeyEvent),
    View(ViewChange),
    InputMethod(InputMethodEvent),
}

#[derive(Clone, Default)]
pub struct ViewLog(Rc<RefCell<Vec<ViewEvent>>>);

impl ViewLog {
    pub fn events(&self) -> Vec<ViewEvent> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn mouse_events(&self) -> Vec<MouseEvent> {
        self.0
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ViewEvent::Mouse(mouse) => Some(*mouse),
                _ => None,
            })
            .collect()
    }

    pub fn scroll_events(&self) -> Vec<ScrollEvent> {
        self.0
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ViewEvent::Scroll(scroll) => Some(*scroll),
                _ => None,
            })
            .collect()
    }

    pub fn key_events(&self) -> Vec<KeyEvent> {
        self.0
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ViewEvent::Key(key) => Some(*key),
                _ => None,
            })
            .collect()
    }

    pub fn input_method_events(&self) -> Vec<InputMethodEvent> {
        self.0
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ViewEvent::InputMethod(im) => Some(im.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ViewEvent) -> Result<()> {
        self.0.borrow_mut().push(event);
        Ok(())
    }
}

pub struct RecordingView(ViewLog);

impl ViewPeer for RecordingView {
    fn notify_resize(&self, width: i32, height: i32) -> Result<()> {
        self.0.record(ViewEvent::Resize(width, height))
    }

    fn notify_repaint(&self, area: Geometry) -> Result<()> {
        self.0.record(ViewEvent::Repaint(area))
    }

    fn notify_mouse(&self, event: MouseEvent) -> Result<()> {
        self.0.record(ViewEvent::Mouse(event))
    }

    fn notify_menu(&self, x: i32, y: i32, x_root: i32, y_root: i32, keyboard: bool) -> Result<()> {
        self.0.record(ViewEvent::Menu(x, y, x_root, y_root, keyboard))
    }

    fn notify_scroll(&self, event: ScrollEvent) -> Result<()> {
        self.0.record(ViewEvent::Scroll(event))
    }

    fn notify_key(&self, event: KeyEvent) -> Result<()> {
        self.0.record(ViewEvent::Key(event))
    }

    fn notify_view(&self, change: ViewChange) -> Result<()> {
        self.0.record(ViewEvent::View(change))
    }

    fn notify_input_method(&self, event: InputMethodEvent) -> Result<()> {
        self.0.record(ViewEvent::InputMethod(event))
    }

    fn candidate_position(&self, _offset: i32) -> Result<[f64; 2]> {
        Ok([0.0, 0.0])
    }
}

/// Input method replaying one filter result per key
pub struct ScriptedInput {
    script: VecDeque<ImeFilter>,
}

impl ScriptedInput {
    pub fn new(script: Vec<ImeFilter>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl InputMethod for ScriptedInput {
    fn focus_in(&mut self) -> Result<()> {
        Ok(())
    }

    fn focus_out(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_cursor_location(&mut self, _x: i32, _y: i32) -> Result<()> {
        Ok(())
    }

    fn filter_key(&mut self, _key: &KeyInput) -> Result<ImeFilter> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

pub struct ScriptedInputFactory(Vec<ImeFilter>);

impl ScriptedInputFactory {
    pub fn new(script: Vec<ImeFilter>) -> Self {
        Self(script)
    }
}

impl InputMethodFactory for ScriptedInputFactory {
    fn create(&self, _window: NativeWindow) -> Result<Box<dyn InputMethod>> {
        Ok(Box::new(ScriptedInput::new(self.0.clone())))
    }
}

/// A manager wired to a mock window system and recording peers
pub struct Harness {
    pub manager: ContextManager,
    pub system: MockSystem,
    pub peer_log: PeerLog,
    pub view_log: ViewLog,
}

pub fn harness() -> Harness {
    let system = MockSystem::new();
    let manager = ContextManager::new(
        Box::new(system.clone()),
        Box::new(crate::context::DirectInputFactory),
        Config::default(),
    )
    .expect("mock manager");
    let peer_log = PeerLog::default();
    peer_log.connect(manager.requests());
    Harness {
        manager,
        system,
        peer_log,
        view_log: ViewLog::default(),
    }
}

impl Harness {
    pub fn peer(&self) -> Rc<dyn WindowPeer> {
        Rc::new(RecordingPeer(self.peer_log.clone()))
    }

    pub fn top(&mut self, frame: FrameType) -> ContextId {
        let peer = self.peer();
        self.manager
            .create_top_level(Some(peer), None, 0, frame, WindowType::Normal)
            .expect("top-level")
    }

    pub fn plug(&mut self) -> ContextId {
        let peer = self.peer();
        self.manager.create_plug(Some(peer), 0x0040_0001).expect("plug")
    }

    pub fn child(&mut self, plug: ContextId) -> ContextId {
        let peer = self.peer();
        self.manager.create_child(Some(peer), plug).expect("child")
    }

    /// Attaches a view recording into `view_log`
    pub fn attach_view(&mut self, id: ContextId) -> Rc<View> {
        let view = View::new(Box::new(RecordingView(self.view_log.clone())));
        self.manager
            .set_view(id, Some(view.clone()))
            .expect("set_view");
        view
    }

    pub fn native(&self, id: ContextId) -> NativeWindow {
        self.manager.native_window(id).expect("native window")
    }

    pub fn send(&mut self, native: NativeWindow, event: NativeEvent) {
        self.manager.dispatch(BackendEvent::Window(native, event));
    }

    pub fn set_ime(&mut self, factory: impl InputMethodFactory + 'static) {
        self.manager.set_input_method_factory(Box::new(factory));
    }
}

pub fn key_input(press: bool, keycode: u8, keyval: u32, state: NativeState) -> KeyInput {
    KeyInput {
        press,
        keycode,
        keyval,
        state,
        group: 0,
        time: 0,
    }
}

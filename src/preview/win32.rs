//! Native preview window on raw Win32.
//!
//! Closing the window posts [`WindowEvent::CloseRequested`] instead of
//! destroying it. Only [`NativeWindow::destroy`] removes the native window.
//! Right-click opens a menu for the toolbar, size presets and saving.

use crate::preview::frame::PreviewFrame;
use crate::preview::placement::SizeMode;
use crate::preview::toolkit::{NativeWindow, WindowEvent, WindowPlacement, WindowSpec, WindowToolkit};
use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::mem;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Mutex, Once};
use std::thread;
use std::time::Duration;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{COLORREF, HINSTANCE, HWND, LPARAM, LRESULT, POINT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, DrawTextW, EndPaint, FillRect, GetStockObject, InvalidateRect, SetBkMode, SetTextColor,
    StretchDIBits, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, BLACK_BRUSH, DIB_RGB_COLORS, DT_CENTER,
    DT_SINGLELINE, DT_VCENTER, DT_WORDBREAK, HBRUSH, PAINTSTRUCT, SRCCOPY, TRANSPARENT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    AppendMenuW, CreatePopupMenu, CreateWindowExW, DefWindowProcW, DestroyMenu, DestroyWindow,
    DispatchMessageW, GetClientRect, GetCursorPos, GetWindowLongPtrW, GetWindowRect, PeekMessageW,
    RegisterClassW, SetWindowLongPtrW, SetWindowPos, SetWindowTextW, ShowWindow, TrackPopupMenu,
    TranslateMessage, CW_USEDEFAULT, GWLP_USERDATA, HMENU, MF_SEPARATOR, MF_STRING, MSG, PM_REMOVE,
    SIZE_MINIMIZED, SIZE_RESTORED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOZORDER, SW_HIDE, SW_MINIMIZE,
    SW_RESTORE, SW_SHOW, TPM_RIGHTBUTTON, WINDOW_EX_STYLE, WM_CLOSE, WM_COMMAND, WM_ERASEBKGND, WM_MOVE,
    WM_PAINT, WM_RBUTTONUP, WM_SIZE, WNDCLASSW, WS_OVERLAPPEDWINDOW,
};

const CLASS_NAME: &str = "WatchPointPreview";
const TOOLBAR_HEIGHT: i32 = 24;
const SIGNAL_PANEL_HEIGHT: i32 = 60;
const TOOLBAR_HINT: &str = "Right-click for options";

const MENU_TOGGLE_TOOLBAR: usize = 1;
const MENU_SAVE_IMAGE: usize = 2;
const MENU_SIZE_BASE: usize = 100;

static EVENT_SENDERS: Lazy<Mutex<HashMap<isize, Sender<WindowEvent>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn widestring(value: &str) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    std::ffi::OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn hwnd_key(hwnd: HWND) -> isize {
    hwnd.0 as isize
}

fn send_event(hwnd: HWND, event: WindowEvent) {
    if let Ok(senders) = EVENT_SENDERS.lock() {
        if let Some(tx) = senders.get(&hwnd_key(hwnd)) {
            let _ = tx.send(event);
        }
    }
}

/// Drawing state read by the window procedure, owned through
/// `GWLP_USERDATA`.
#[derive(Default)]
struct Surface {
    bgra: Vec<u8>,
    width: i32,
    height: i32,
    text: String,
    toolbar_visible: bool,
}

fn surface_of(hwnd: HWND) -> Option<&'static mut Surface> {
    let ptr = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *mut Surface;
    unsafe { ptr.as_mut() }
}

fn save_target() -> PathBuf {
    let dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("watchpoint_saves")))
        .unwrap_or_else(|| PathBuf::from("watchpoint_saves"));
    let _ = std::fs::create_dir_all(&dir);
    dir.join(format!("watchpoint_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")))
}

fn show_context_menu(hwnd: HWND) {
    unsafe {
        let Ok(menu) = CreatePopupMenu() else {
            return;
        };
        let toggle = widestring("Toggle toolbar");
        let save = widestring("Save image");
        let _ = AppendMenuW(menu, MF_STRING, MENU_TOGGLE_TOOLBAR, PCWSTR(toggle.as_ptr()));
        let _ = AppendMenuW(menu, MF_STRING, MENU_SAVE_IMAGE, PCWSTR(save.as_ptr()));
        let _ = AppendMenuW(menu, MF_SEPARATOR, 0, PCWSTR::null());
        let labels: Vec<Vec<u16>> = SizeMode::MENU_PRESETS
            .iter()
            .map(|mode| widestring(&mode.label()))
            .collect();
        for (i, label) in labels.iter().enumerate() {
            let _ = AppendMenuW(menu, MF_STRING, MENU_SIZE_BASE + i, PCWSTR(label.as_ptr()));
        }
        let mut cursor = POINT::default();
        if GetCursorPos(&mut cursor).is_ok() {
            let _ = TrackPopupMenu(menu, TPM_RIGHTBUTTON, cursor.x, cursor.y, 0, hwnd, None);
        }
        let _ = DestroyMenu(menu);
    }
}

fn paint(hwnd: HWND) {
    let mut ps = PAINTSTRUCT::default();
    let hdc = unsafe { BeginPaint(hwnd, &mut ps) };
    if hdc.0.is_null() {
        return;
    }
    let mut client = RECT::default();
    unsafe {
        let _ = GetClientRect(hwnd, &mut client);
        FillRect(hdc, &client, HBRUSH(GetStockObject(BLACK_BRUSH).0));
    }

    if let Some(surface) = surface_of(hwnd) {
        let top = if surface.toolbar_visible { TOOLBAR_HEIGHT } else { 0 };
        let image_bottom = (client.bottom - SIGNAL_PANEL_HEIGHT).max(top);
        unsafe {
            SetBkMode(hdc, TRANSPARENT);
            SetTextColor(hdc, COLORREF(0x00E0_E0E0));
        }

        if surface.toolbar_visible {
            let mut hint: Vec<u16> = TOOLBAR_HINT.encode_utf16().collect();
            let mut rect = RECT {
                left: 0,
                top: 0,
                right: client.right,
                bottom: TOOLBAR_HEIGHT,
            };
            unsafe {
                DrawTextW(hdc, &mut hint, &mut rect, DT_CENTER | DT_VCENTER | DT_SINGLELINE);
            }
        }

        if surface.width > 0 && surface.height > 0 && !surface.bgra.is_empty() {
            let area_w = client.right.max(1);
            let area_h = (image_bottom - top).max(1);
            let scale = f64::min(
                area_w as f64 / surface.width as f64,
                area_h as f64 / surface.height as f64,
            );
            let dw = ((surface.width as f64 * scale) as i32).max(1);
            let dh = ((surface.height as f64 * scale) as i32).max(1);
            let mut bmi = BITMAPINFO::default();
            bmi.bmiHeader = BITMAPINFOHEADER {
                biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: surface.width,
                biHeight: -surface.height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            };
            unsafe {
                StretchDIBits(
                    hdc,
                    (area_w - dw) / 2,
                    top + (area_h - dh) / 2,
                    dw,
                    dh,
                    0,
                    0,
                    surface.width,
                    surface.height,
                    Some(surface.bgra.as_ptr() as *const _),
                    &bmi,
                    DIB_RGB_COLORS,
                    SRCCOPY,
                );
            }
        }

        let mut text: Vec<u16> = surface.text.encode_utf16().collect();
        let mut rect = RECT {
            left: 8,
            top: image_bottom,
            right: client.right - 8,
            bottom: client.bottom,
        };
        unsafe {
            DrawTextW(hdc, &mut text, &mut rect, DT_CENTER | DT_WORDBREAK);
        }
    }

    unsafe {
        let _ = EndPaint(hwnd, &ps);
    }
}

unsafe extern "system" fn preview_wndproc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        WM_CLOSE => {
            send_event(hwnd, WindowEvent::CloseRequested);
            LRESULT(0)
        }
        WM_SIZE => {
            match wparam.0 as u32 {
                SIZE_MINIMIZED => send_event(hwnd, WindowEvent::Minimized),
                SIZE_RESTORED => send_event(hwnd, WindowEvent::Restored),
                _ => {}
            }
            let _ = unsafe { InvalidateRect(hwnd, None, false) };
            LRESULT(0)
        }
        WM_MOVE => {
            let x = (lparam.0 & 0xffff) as i16 as i32;
            let y = ((lparam.0 >> 16) & 0xffff) as i16 as i32;
            send_event(hwnd, WindowEvent::Moved { x, y });
            LRESULT(0)
        }
        WM_RBUTTONUP => {
            show_context_menu(hwnd);
            LRESULT(0)
        }
        WM_COMMAND => {
            match wparam.0 & 0xffff {
                MENU_TOGGLE_TOOLBAR => send_event(hwnd, WindowEvent::ToggleToolbar),
                MENU_SAVE_IMAGE => send_event(hwnd, WindowEvent::SaveImageRequested(save_target())),
                id if id >= MENU_SIZE_BASE => {
                    if let Some(mode) = SizeMode::MENU_PRESETS.get(id - MENU_SIZE_BASE) {
                        send_event(hwnd, WindowEvent::SizeModeSelected(*mode));
                    }
                }
                _ => {}
            }
            LRESULT(0)
        }
        WM_ERASEBKGND => LRESULT(1),
        WM_PAINT => {
            paint(hwnd);
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Toolkit;

impl Win32Toolkit {
    pub fn new() -> Self {
        Self
    }
}

impl WindowToolkit for Win32Toolkit {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn open(&self, spec: &WindowSpec) -> Result<Box<dyn NativeWindow>> {
        static REGISTER_CLASS: Once = Once::new();
        let class_name = widestring(CLASS_NAME);
        let title = widestring(&spec.title);
        let hinstance: HINSTANCE = unsafe { GetModuleHandleW(PCWSTR::null()) }
            .context("resolve module handle")?
            .into();

        REGISTER_CLASS.call_once(|| unsafe {
            let wc = WNDCLASSW {
                hInstance: hinstance,
                lpszClassName: PCWSTR(class_name.as_ptr()),
                lpfnWndProc: Some(preview_wndproc),
                ..Default::default()
            };
            let _ = RegisterClassW(&wc);
        });

        let (x, y) = spec.placement.position.unwrap_or((CW_USEDEFAULT, CW_USEDEFAULT));
        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                PCWSTR(class_name.as_ptr()),
                PCWSTR(title.as_ptr()),
                WS_OVERLAPPEDWINDOW,
                x,
                y,
                spec.placement.width as i32,
                spec.placement.height as i32,
                None,
                HMENU::default(),
                hinstance,
                None,
            )
        }
        .context("create preview window")?;

        let surface = Box::new(Surface {
            toolbar_visible: spec.show_toolbar,
            ..Surface::default()
        });
        let (tx, rx) = channel();
        if let Ok(mut senders) = EVENT_SENDERS.lock() {
            senders.insert(hwnd_key(hwnd), tx);
        }
        unsafe {
            let _ = SetWindowLongPtrW(hwnd, GWLP_USERDATA, Box::into_raw(surface) as isize);
            let _ = ShowWindow(hwnd, SW_SHOW);
        }

        Ok(Box::new(Win32Window { hwnd, events: rx }))
    }
}

struct Win32Window {
    hwnd: HWND,
    events: Receiver<WindowEvent>,
}

impl Win32Window {
    fn surface(&mut self) -> Result<&mut Surface> {
        surface_of(self.hwnd).ok_or_else(|| anyhow!("preview window has no surface"))
    }

    fn invalidate(&self) {
        unsafe {
            let _ = InvalidateRect(self.hwnd, None, false);
        }
    }
}

impl NativeWindow for Win32Window {
    fn pump_events(&mut self, wait: Duration) -> Result<Vec<WindowEvent>> {
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).into() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if events.is_empty() {
            thread::sleep(wait);
        }
        Ok(events)
    }

    fn render(&mut self, frame: &PreviewFrame) -> Result<()> {
        let image = frame.image();
        let surface = self.surface()?;
        surface.width = image.width() as i32;
        surface.height = image.height() as i32;
        surface.bgra.clear();
        surface.bgra.reserve(image.as_raw().len());
        for px in image.pixels() {
            let [r, g, b, a] = px.0;
            surface.bgra.extend_from_slice(&[b, g, r, a]);
        }
        self.invalidate();
        Ok(())
    }

    fn set_signal_text(&mut self, text: &str) -> Result<()> {
        self.surface()?.text = text.to_string();
        self.invalidate();
        Ok(())
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        let title = widestring(title);
        unsafe { SetWindowTextW(self.hwnd, PCWSTR(title.as_ptr())) }.context("set window title")
    }

    fn apply_placement(&mut self, placement: &WindowPlacement) -> Result<()> {
        let (x, y) = placement.position.unwrap_or_default();
        let mut flags = SWP_NOZORDER | SWP_NOACTIVATE;
        if placement.position.is_none() {
            flags |= SWP_NOMOVE;
        }
        unsafe {
            SetWindowPos(
                self.hwnd,
                HWND::default(),
                x,
                y,
                placement.width as i32,
                placement.height as i32,
                flags,
            )
        }
        .context("move preview window")
    }

    fn set_toolbar_visible(&mut self, visible: bool) -> Result<()> {
        self.surface()?.toolbar_visible = visible;
        self.invalidate();
        Ok(())
    }

    fn minimize(&mut self) -> Result<()> {
        unsafe {
            let _ = ShowWindow(self.hwnd, SW_MINIMIZE);
        }
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        unsafe {
            let _ = ShowWindow(self.hwnd, SW_HIDE);
        }
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        unsafe {
            let _ = ShowWindow(self.hwnd, SW_RESTORE);
        }
        Ok(())
    }

    fn position(&self) -> Option<(i32, i32)> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(self.hwnd, &mut rect) }.ok()?;
        Some((rect.left, rect.top))
    }

    fn release_resources(&mut self) -> Result<()> {
        if let Ok(surface) = self.surface() {
            surface.bgra = Vec::new();
            surface.width = 0;
            surface.height = 0;
        }
        self.invalidate();
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        if self.hwnd.0.is_null() {
            return Ok(());
        }
        let ptr = unsafe { SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0) } as *mut Surface;
        if !ptr.is_null() {
            drop(unsafe { Box::from_raw(ptr) });
        }
        if let Ok(mut senders) = EVENT_SENDERS.lock() {
            senders.remove(&hwnd_key(self.hwnd));
        }
        unsafe { DestroyWindow(self.hwnd) }.context("destroy preview window")?;
        self.hwnd = HWND::default();
        Ok(())
    }
}

// src/bus/libdbus.rs

//! libdbus implementation of [`MessageBus`].
//!
//! libdbus reports watches through add/remove/toggle callbacks that may fire
//! from inside any libdbus call. They write straight into the shared
//! [`WatchRegistry`], whose `Rc` is leaked into libdbus as callback data and
//! reclaimed by the free callback when the connection lets go of it.
//!
//! A [`WatchId`] is the address of the libdbus watch. It is only turned back
//! into a pointer while the registry still holds it, which libdbus
//! guarantees is before the watch is freed.

use anyhow::{anyhow, Context, Result};
use libc::{c_char, c_int, c_uint, c_void};
use libdbus_sys as ffi;
use log::{debug, error, info, trace, warn};
use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr;
use std::rc::Rc;

use super::{Arg, HandlerResult, MessageBus, MessageRouter, MethodCall, Reply};
use crate::error::FatalError;
use crate::watch::{SharedWatchRegistry, Watch, WatchFlags, WatchId, WatchRegistry};

const DBUS_MESSAGE_TYPE_METHOD_CALL: c_int = 1;
const DBUS_NAME_FLAG_DO_NOT_QUEUE: c_uint = 4;
const DBUS_REQUEST_NAME_REPLY_PRIMARY_OWNER: c_int = 1;
const DBUS_REQUEST_NAME_REPLY_ALREADY_OWNER: c_int = 4;

const DBUS_TYPE_INVALID: c_int = 0;
const DBUS_TYPE_STRING: c_int = b's' as c_int;
const DBUS_TYPE_UINT32: c_int = b'u' as c_int;
const DBUS_TYPE_INT32: c_int = b'i' as c_int;
const DBUS_TYPE_BOOLEAN: c_int = b'b' as c_int;

/// A `DBusError` that is initialised on creation and freed on drop.
struct BusError(ffi::DBusError);

impl BusError {
    fn new() -> Self {
        // SAFETY: DBusError is plain data; dbus_error_init sets every field.
        let mut raw: ffi::DBusError = unsafe { mem::zeroed() };
        unsafe { ffi::dbus_error_init(&mut raw) };
        BusError(raw)
    }

    /// libdbus fills in `name` exactly when it sets an error.
    fn is_set(&self) -> bool {
        !self.0.name.is_null()
    }

    fn to_error(&self) -> anyhow::Error {
        // SAFETY: name and message are null or valid C strings owned by self.0.
        let text = |p: *const c_char| {
            if p.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
            }
        };
        anyhow!("{}: {}", text(self.0.name), text(self.0.message))
    }
}

impl Drop for BusError {
    fn drop(&mut self) {
        // SAFETY: freeing an unset error is a no-op.
        unsafe { ffi::dbus_error_free(&mut self.0) };
    }
}

fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).with_context(|| format!("{:?} contains a NUL byte", s))
}

/// # Safety
/// `p` must be null or point to a NUL-terminated string.
unsafe fn opt_string(p: *const c_char) -> Option<String> {
    if p.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
    }
}

// --- Watch callbacks ---

/// `DBusWatchFlags` bits for readiness seen by `poll(2)`. The two share bit
/// values, so this only narrows to the four bits libdbus knows.
fn watch_event_bits(readiness: WatchFlags) -> c_uint {
    (readiness & WatchFlags::all()).bits() as c_uint
}

/// # Safety
/// `watch` must be a live libdbus watch.
unsafe fn describe_watch(watch: *mut ffi::DBusWatch) -> Watch {
    let (fd, flags, enabled) = unsafe {
        (
            ffi::dbus_watch_get_unix_fd(watch),
            ffi::dbus_watch_get_flags(watch),
            ffi::dbus_watch_get_enabled(watch) != 0,
        )
    };
    Watch {
        id: WatchId::new(watch as usize),
        fd,
        interest: WatchFlags::from_bits_truncate(flags as u32),
        enabled,
    }
}

/// # Safety
/// `data` must be the pointer produced by `Rc::into_raw` in
/// `set_watch_registry` and not yet released by `release_registry`.
unsafe fn registry_from<'a>(data: *mut c_void) -> &'a RefCell<WatchRegistry> {
    unsafe { &*(data as *const RefCell<WatchRegistry>) }
}

extern "C" fn on_add_watch(watch: *mut ffi::DBusWatch, data: *mut c_void) -> u32 {
    // SAFETY: libdbus passes back our registry pointer and a live watch.
    let (registry, entry) = unsafe { (registry_from(data), describe_watch(watch)) };
    match registry.try_borrow_mut() {
        Ok(mut watches) => watches.add(entry) as u32,
        Err(_) => {
            error!("Watch registry busy; cannot add watch on fd {}", entry.fd);
            0
        }
    }
}

extern "C" fn on_remove_watch(watch: *mut ffi::DBusWatch, data: *mut c_void) {
    // SAFETY: as in on_add_watch.
    let registry = unsafe { registry_from(data) };
    let id = WatchId::new(watch as usize);
    match registry.try_borrow_mut() {
        Ok(mut watches) => {
            watches.remove(id);
        }
        Err(_) => error!("Watch registry busy; cannot remove watch {:?}", id),
    }
}

extern "C" fn on_toggle_watch(watch: *mut ffi::DBusWatch, data: *mut c_void) {
    // SAFETY: as in on_add_watch.
    let (registry, entry) = unsafe { (registry_from(data), describe_watch(watch)) };
    match registry.try_borrow_mut() {
        Ok(mut watches) => {
            watches.toggle(entry.id, entry.enabled, entry.interest);
        }
        Err(_) => error!("Watch registry busy; cannot toggle watch {:?}", entry.id),
    }
}

extern "C" fn release_registry(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    // SAFETY: balances the Rc::into_raw in set_watch_registry; libdbus calls
    // this once when it drops the callback data.
    drop(unsafe { Rc::from_raw(data as *const RefCell<WatchRegistry>) });
    trace!("libdbus released the watch registry");
}

// --- Message dispatch ---

/// Where the message callback finds the router during `dispatch_pending`.
/// Boxed so its address stays fixed while libdbus holds it.
struct DispatchSlot {
    router: Cell<Option<*mut (dyn MessageRouter + 'static)>>,
}

static OBJECT_VTABLE: ffi::DBusObjectPathVTable = ffi::DBusObjectPathVTable {
    unregister_function: None,
    message_function: Some(on_message),
    dbus_internal_pad1: None,
    dbus_internal_pad2: None,
    dbus_internal_pad3: None,
    dbus_internal_pad4: None,
};

/// # Safety
/// `msg` must be a live message.
unsafe fn decode_call(msg: *mut ffi::DBusMessage) -> Option<MethodCall> {
    unsafe {
        if ffi::dbus_message_get_type(msg) != DBUS_MESSAGE_TYPE_METHOD_CALL {
            return None;
        }
        let path = opt_string(ffi::dbus_message_get_path(msg))?;
        let interface = opt_string(ffi::dbus_message_get_interface(msg));
        let member = opt_string(ffi::dbus_message_get_member(msg))?;

        let mut args = Vec::new();
        let mut iter: ffi::DBusMessageIter = mem::zeroed();
        if ffi::dbus_message_iter_init(msg, &mut iter) != 0 {
            loop {
                let code = ffi::dbus_message_iter_get_arg_type(&mut iter);
                if code == DBUS_TYPE_INVALID {
                    break;
                }
                args.push(match code {
                    DBUS_TYPE_STRING => {
                        let mut value: *const c_char = ptr::null();
                        ffi::dbus_message_iter_get_basic(&mut iter, &mut value as *mut _ as *mut c_void);
                        Arg::Str(opt_string(value).unwrap_or_default())
                    }
                    DBUS_TYPE_UINT32 => {
                        let mut value: u32 = 0;
                        ffi::dbus_message_iter_get_basic(&mut iter, &mut value as *mut _ as *mut c_void);
                        Arg::U32(value)
                    }
                    DBUS_TYPE_INT32 => {
                        let mut value: i32 = 0;
                        ffi::dbus_message_iter_get_basic(&mut iter, &mut value as *mut _ as *mut c_void);
                        Arg::I32(value)
                    }
                    DBUS_TYPE_BOOLEAN => {
                        let mut value: u32 = 0;
                        ffi::dbus_message_iter_get_basic(&mut iter, &mut value as *mut _ as *mut c_void);
                        Arg::Bool(value != 0)
                    }
                    other => Arg::Other(char::from(other as u8)),
                });
                if ffi::dbus_message_iter_next(&mut iter) == 0 {
                    break;
                }
            }
        }
        Some(MethodCall {
            path,
            interface,
            member,
            args,
        })
    }
}

/// # Safety
/// `conn` and `call` must be live; `call` is the message being answered.
unsafe fn send_reply(
    conn: *mut ffi::DBusConnection,
    call: *mut ffi::DBusMessage,
    reply: &Reply,
) -> Result<()> {
    let message = match reply {
        Reply::Return(values) => {
            let message = unsafe { ffi::dbus_message_new_method_return(call) };
            if message.is_null() {
                return Err(anyhow!("out of memory building method return"));
            }
            let mut iter: ffi::DBusMessageIter = unsafe { mem::zeroed() };
            unsafe { ffi::dbus_message_iter_init_append(message, &mut iter) };
            for value in values {
                let appended = match value {
                    Arg::Str(s) => {
                        let text = to_cstring(s)?;
                        let p = text.as_ptr();
                        unsafe {
                            ffi::dbus_message_iter_append_basic(
                                &mut iter,
                                DBUS_TYPE_STRING,
                                &p as *const _ as *const c_void,
                            )
                        }
                    }
                    Arg::U32(v) => unsafe {
                        ffi::dbus_message_iter_append_basic(&mut iter, DBUS_TYPE_UINT32, v as *const u32 as *const c_void)
                    },
                    Arg::I32(v) => unsafe {
                        ffi::dbus_message_iter_append_basic(&mut iter, DBUS_TYPE_INT32, v as *const i32 as *const c_void)
                    },
                    Arg::Bool(b) => {
                        let v = *b as u32;
                        unsafe {
                            ffi::dbus_message_iter_append_basic(&mut iter, DBUS_TYPE_BOOLEAN, &v as *const u32 as *const c_void)
                        }
                    }
                    Arg::Other(code) => {
                        warn!("Cannot encode reply value of type '{}'; dropped", code);
                        1
                    }
                };
                if appended == 0 {
                    unsafe { ffi::dbus_message_unref(message) };
                    return Err(anyhow!("out of memory appending reply arguments"));
                }
            }
            message
        }
        Reply::Error { name, message } => {
            let name = to_cstring(name)?;
            let text = to_cstring(message)?;
            let reply = unsafe { ffi::dbus_message_new_error(call, name.as_ptr(), text.as_ptr()) };
            if reply.is_null() {
                return Err(anyhow!("out of memory building error reply"));
            }
            reply
        }
    };

    let queued = unsafe { ffi::dbus_connection_send(conn, message, ptr::null_mut()) };
    unsafe { ffi::dbus_message_unref(message) };
    if queued == 0 {
        return Err(anyhow!("out of memory queueing reply"));
    }
    Ok(())
}

extern "C" fn on_message(
    conn: *mut ffi::DBusConnection,
    msg: *mut ffi::DBusMessage,
    data: *mut c_void,
) -> ffi::DBusHandlerResult {
    // SAFETY: `data` is the boxed DispatchSlot owned by LibDbus, which
    // outlives every registration.
    let slot = unsafe { &*(data as *const DispatchSlot) };
    let Some(router) = slot.router.get() else {
        warn!("Message arrived outside of dispatch; leaving it unhandled");
        return ffi::DBusHandlerResult::NotYetHandled;
    };
    // SAFETY: libdbus passes a live message.
    let Some(call) = (unsafe { decode_call(msg) }) else {
        return ffi::DBusHandlerResult::NotYetHandled;
    };

    // SAFETY: the slot only holds a router while dispatch_pending is running
    // with that router mutably borrowed, and nothing else touches it.
    let router = unsafe { &mut *router };
    match router.route(&call) {
        HandlerResult::Handled(reply) => {
            // SAFETY: conn and msg are live for the duration of the callback.
            if let Err(e) = unsafe { send_reply(conn, msg, &reply) } {
                warn!("Failed to reply to {} on {}: {:#}", call.member, call.path, e);
            }
            ffi::DBusHandlerResult::Handled
        }
        HandlerResult::NotYetHandled => ffi::DBusHandlerResult::NotYetHandled,
    }
}

// --- Connection ---

/// A private session-bus connection.
pub struct LibDbus {
    conn: *mut ffi::DBusConnection,
    registry: Option<SharedWatchRegistry>,
    slot: Box<DispatchSlot>,
}

impl LibDbus {
    /// Opens a private connection to the session bus.
    pub fn connect_session() -> Result<Self> {
        info!("Connecting to the session bus.");
        let mut err = BusError::new();
        // SAFETY: err is initialised; a null return leaves it set.
        let conn = unsafe { ffi::dbus_bus_get_private(ffi::DBusBusType::Session, &mut err.0) };
        if conn.is_null() || err.is_set() {
            return Err(err.to_error()).context(FatalError::BusConnect);
        }
        debug!("Session bus connection: {:p}", conn);
        Ok(Self {
            conn,
            registry: None,
            slot: Box::new(DispatchSlot {
                router: Cell::new(None),
            }),
        })
    }

    fn slot_ptr(&self) -> *mut c_void {
        &*self.slot as *const DispatchSlot as *mut c_void
    }
}

impl MessageBus for LibDbus {
    fn set_watch_registry(&mut self, registry: SharedWatchRegistry) -> Result<()> {
        let data = Rc::into_raw(Rc::clone(&registry)) as *mut c_void;
        // SAFETY: the callbacks match libdbus' signatures; `data` is released
        // by release_registry once libdbus replaces or drops it.
        let ok = unsafe {
            ffi::dbus_connection_set_watch_functions(
                self.conn,
                Some(on_add_watch),
                Some(on_remove_watch),
                Some(on_toggle_watch),
                data,
                Some(release_registry),
            )
        };
        if ok == 0 {
            // The registry reference stays leaked; better than freeing it twice.
            return Err(anyhow!("dbus_connection_set_watch_functions ran out of memory"));
        }
        debug!("Bus watch callbacks installed; {} watch(es) reported", registry.borrow().len());
        self.registry = Some(registry);
        Ok(())
    }

    fn request_name(&mut self, name: &str) -> Result<bool> {
        let cname = to_cstring(name)?;
        let mut err = BusError::new();
        // SAFETY: live connection, valid C string, initialised error.
        let reply = unsafe {
            ffi::dbus_bus_request_name(
                self.conn,
                cname.as_ptr(),
                DBUS_NAME_FLAG_DO_NOT_QUEUE,
                &mut err.0,
            )
        };
        if err.is_set() {
            return Err(err.to_error()).with_context(|| format!("Failed to request bus name {}", name));
        }
        Ok(reply == DBUS_REQUEST_NAME_REPLY_PRIMARY_OWNER
            || reply == DBUS_REQUEST_NAME_REPLY_ALREADY_OWNER)
    }

    fn unique_name(&self) -> Result<String> {
        // SAFETY: the returned string is owned by the connection.
        unsafe { opt_string(ffi::dbus_bus_get_unique_name(self.conn)) }
            .ok_or_else(|| anyhow!("bus connection has no unique name"))
    }

    fn register_path(&mut self, path: &str) -> Result<()> {
        let cpath = to_cstring(path)?;
        let mut err = BusError::new();
        // SAFETY: the vtable is static and the slot outlives the connection.
        let ok = unsafe {
            ffi::dbus_connection_try_register_object_path(
                self.conn,
                cpath.as_ptr(),
                &OBJECT_VTABLE,
                self.slot_ptr(),
                &mut err.0,
            )
        };
        if ok == 0 {
            return Err(err.to_error()).with_context(|| format!("Failed to register object path {}", path));
        }
        debug!("Registered object path {}", path);
        Ok(())
    }

    fn unregister_path(&mut self, path: &str) -> Result<()> {
        let cpath = to_cstring(path)?;
        // SAFETY: live connection, valid C string.
        let ok = unsafe { ffi::dbus_connection_unregister_object_path(self.conn, cpath.as_ptr()) };
        if ok == 0 {
            return Err(anyhow!("out of memory unregistering {}", path));
        }
        debug!("Unregistered object path {}", path);
        Ok(())
    }

    fn handle_watch(&mut self, watch: WatchId, readiness: WatchFlags) -> Result<()> {
        let known = self
            .registry
            .as_ref()
            .is_some_and(|registry| registry.borrow().contains(watch));
        if !known {
            warn!("Not handing back unregistered watch {:?}", watch);
            return Ok(());
        }
        // SAFETY: the id is the address of a watch libdbus has not removed.
        let ok = unsafe {
            ffi::dbus_watch_handle(watch.raw() as *mut ffi::DBusWatch, watch_event_bits(readiness))
        };
        if ok == 0 {
            warn!("libdbus ran out of memory handling watch {:?}; will retry", watch);
        }
        Ok(())
    }

    fn dispatch_pending(&mut self, router: &mut dyn MessageRouter) -> Result<()> {
        let router: *mut (dyn MessageRouter + '_) = router;
        // SAFETY: the slot is cleared below before `router`'s borrow ends.
        let router: *mut (dyn MessageRouter + 'static) = unsafe { mem::transmute(router) };
        self.slot.router.set(Some(router));

        let mut rounds = 0usize;
        loop {
            // SAFETY: live connection; callbacks only run on this thread.
            let status = unsafe { ffi::dbus_connection_dispatch(self.conn) };
            rounds += 1;
            if !matches!(status, ffi::DBusDispatchStatus::DataRemains) {
                break;
            }
        }

        self.slot.router.set(None);
        trace!("Bus dispatch finished after {} round(s)", rounds);
        Ok(())
    }

    fn has_pending_dispatch(&mut self) -> bool {
        // SAFETY: live connection; this only inspects the incoming queue.
        let status = unsafe { ffi::dbus_connection_get_dispatch_status(self.conn) };
        matches!(status, ffi::DBusDispatchStatus::DataRemains)
    }
}

impl Drop for LibDbus {
    fn drop(&mut self) {
        info!("Closing session bus connection: {:p}", self.conn);
        // SAFETY: private connections must be closed before the last unref.
        unsafe {
            ffi::dbus_connection_close(self.conn);
            ffi::dbus_connection_unref(self.conn);
        }
        self.conn = ptr::null_mut();
    }
}

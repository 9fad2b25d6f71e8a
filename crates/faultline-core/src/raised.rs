//! Raised errors as the registry sees them
//!
//! Anything implementing `std::error::Error` can be captured. What the
//! registry can learn from it depends on the concrete type:
//!
//! - [`TracedError`] carries everything a record wants: an explicit type
//!   name, an optional message, ordered stack frames, a cause and a list
//!   of suppressed companion errors.
//! - Any other error contributes its `Display` message and its `source()`
//!   chain. It has no frames, so its record is partial (no root frame).
//!
//! [`RaisedError`] is the borrowed view over either shape that record
//! construction walks.

use std::any::type_name;
use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::frame::{self, StackFrame};

/// Boxed error accepted as a cause or suppressed companion.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Identity of the error value a record was captured from.
///
/// Two distinct errors with the same type and root frame still differ
/// here, while capturing the same value twice yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Token synthesized by a [`TracedError`] at first capture.
    Token(u64),
    /// A plain error value: its address at capture time plus a hash of
    /// its type name and rendered content.
    ///
    /// Errors built in the same stack slot share an address, so the
    /// fingerprint keeps them apart. Two plain values at one address with
    /// identical content cannot be told apart; use [`TracedError`] when
    /// every instance must be distinct.
    Plain { address: usize, fingerprint: u64 },
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Token(t) => write!(f, "tok:{}", t),
            SourceId::Plain { address, fingerprint } => {
                write!(f, "addr:{:#x}/{:016x}", address, fingerprint)
            }
        }
    }
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

// ── TracedError ───────────────────────────────────────────────────

/// An error value that carries its own diagnostic context.
///
/// ```
/// use faultline_core::{traced, TracedError};
///
/// let err = traced!("IOFailure", "disk full")
///     .with_source(TracedError::new("DeviceError", "sector 7 unreadable"));
/// assert_eq!(err.type_name(), "IOFailure");
/// assert_eq!(err.frames().len(), 1);
/// ```
pub struct TracedError {
    type_name:  Cow<'static, str>,
    message:    Option<String>,
    frames:     Vec<StackFrame>,
    source:     Option<BoxError>,
    suppressed: Vec<BoxError>,
    identity:   OnceLock<u64>,
}

impl TracedError {
    pub fn new(type_name: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::of_type(type_name)
        }
    }

    /// An error with a type but no message.
    pub fn of_type(type_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            type_name:  type_name.into(),
            message:    None,
            frames:     Vec::new(),
            source:     None,
            suppressed: Vec::new(),
            identity:   OnceLock::new(),
        }
    }

    pub fn with_source<E>(mut self, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(error));
        self
    }

    pub fn with_suppressed<E>(mut self, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.add_suppressed(error);
        self
    }

    /// Attach an error that was raised while handling this one.
    pub fn add_suppressed<E>(&mut self, error: E)
    where
        E: Error + Send + Sync + 'static,
    {
        self.suppressed.push(Box::new(error));
    }

    /// Replace the frames, innermost first.
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = StackFrame>) -> Self {
        self.frames = frames.into_iter().collect();
        self
    }

    /// Append one frame below the existing ones.
    pub fn at(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Append the frames of the current stack.
    ///
    /// Without the `backtrace` feature this leaves the frames untouched.
    pub fn capture_backtrace(mut self) -> Self {
        self.frames.extend(frame::capture_current());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn suppressed(&self) -> impl Iterator<Item = &(dyn Error + 'static)> + '_ {
        self.suppressed.iter().map(|e| e.as_ref() as &(dyn Error + 'static))
    }

    /// Identity token, assigned on first use and stable afterwards.
    pub fn source_id(&self) -> SourceId {
        SourceId::Token(*self.identity.get_or_init(next_token))
    }
}

impl Error for TracedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl fmt::Display for TracedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.type_name, msg),
            None => write!(f, "{}", self.type_name),
        }
    }
}

impl fmt::Debug for TracedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("TracedError");
        d.field("type_name", &self.type_name);
        if let Some(msg) = &self.message {
            d.field("message", msg);
        }
        if let Some(root) = self.frames.first() {
            d.field("root", &format_args!("{}", root));
        }
        if let Some(src) = &self.source {
            d.field("source", &src.to_string());
        }
        if !self.suppressed.is_empty() {
            d.field("suppressed", &self.suppressed.len());
        }
        d.finish()
    }
}

/// Build a [`TracedError`] whose root frame is the call site.
///
/// ```ignore
/// traced!("IOFailure", "disk full")
/// traced!("IOFailure", "disk full", source = device_err)
/// ```
#[macro_export]
macro_rules! traced {
    ($type_name:expr, $msg:expr) => {
        $crate::TracedError::new($type_name, $msg).at($crate::here!())
    };
    ($type_name:expr, $msg:expr, source = $source:expr) => {
        $crate::TracedError::new($type_name, $msg)
            .at($crate::here!())
            .with_source($source)
    };
}

// ── RaisedError view ──────────────────────────────────────────────

/// Borrowed view of an error being captured.
#[derive(Clone, Copy)]
pub struct RaisedError<'a> {
    repr: Repr<'a>,
}

#[derive(Clone, Copy)]
enum Repr<'a> {
    Traced(&'a TracedError),
    Plain(&'a (dyn Error + 'static)),
}

impl<'a> RaisedError<'a> {
    /// View a concrete error.
    ///
    /// Same view as [`from_dyn`](Self::from_dyn): a value is named and
    /// identified the same way whether it is captured directly or reached
    /// through another error's `source()`.
    pub fn of<E>(error: &'a E) -> Self
    where
        E: Error + 'static,
    {
        Self::from_dyn(error)
    }

    /// View a type-erased error, e.g. one reached through `source()`.
    pub fn from_dyn(error: &'a (dyn Error + 'static)) -> Self {
        match error.downcast_ref::<TracedError>() {
            Some(traced) => Self { repr: Repr::Traced(traced) },
            None => Self { repr: Repr::Plain(error) },
        }
    }

    pub fn identity(&self) -> SourceId {
        match self.repr {
            Repr::Traced(t) => t.source_id(),
            Repr::Plain(error) => SourceId::Plain {
                address: error as *const dyn Error as *const () as usize,
                fingerprint: fingerprint(error),
            },
        }
    }

    pub fn type_name(&self) -> String {
        match self.repr {
            Repr::Traced(t) => t.type_name().to_string(),
            Repr::Plain(error) => erased_type_name(error),
        }
    }

    /// `None` when the error has no message (or an empty one).
    pub fn message(&self) -> Option<String> {
        match self.repr {
            Repr::Traced(t) => t.message().map(str::to_string),
            Repr::Plain(error) => Some(error.to_string()).filter(|m| !m.is_empty()),
        }
    }

    /// Frames innermost first; empty when none could be produced.
    pub fn frames(&self) -> &'a [StackFrame] {
        match self.repr {
            Repr::Traced(t) => t.frames(),
            Repr::Plain(_) => &[],
        }
    }

    pub fn cause(&self) -> Option<RaisedError<'a>> {
        let error: &'a (dyn Error + 'static) = match self.repr {
            Repr::Traced(t) => t,
            Repr::Plain(error) => error,
        };
        error.source().map(RaisedError::from_dyn)
    }

    pub fn suppressed(&self) -> Vec<RaisedError<'a>> {
        match self.repr {
            Repr::Traced(t) => t.suppressed().map(RaisedError::from_dyn).collect(),
            Repr::Plain(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for RaisedError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaisedError")
            .field("identity", &self.identity())
            .field("type_name", &self.type_name())
            .field("frames", &self.frames().len())
            .finish()
    }
}

/// Content hash of a plain error: type name, `Display` and `Debug` output.
fn fingerprint(error: &(dyn Error + 'static)) -> u64 {
    let mut hasher = DefaultHasher::new();
    erased_type_name(error).hash(&mut hasher);
    error.to_string().hash(&mut hasher);
    format!("{:?}", error).hash(&mut hasher);
    hasher.finish()
}

/// Type name for a plain error, used for every capture path.
///
/// Common std errors are recognised by downcast; anything else is named
/// after the leading identifier of its `Debug` output.
fn erased_type_name(error: &(dyn Error + 'static)) -> String {
    macro_rules! known {
        ($($ty:ty),* $(,)?) => {
            $( if error.is::<$ty>() { return type_name::<$ty>().to_string(); } )*
        };
    }
    known!(
        std::io::Error,
        std::fmt::Error,
        std::num::ParseIntError,
        std::num::ParseFloatError,
        std::str::Utf8Error,
        std::string::FromUtf8Error,
    );

    let debug = format!("{:?}", error);
    let ident: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if ident.is_empty() {
        "<unknown>".to_string()
    } else {
        ident
    }
}

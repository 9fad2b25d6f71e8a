//! Stack frames
//!
//! A [`StackFrame`] names one call-stack location: the declaring type (for
//! Rust code, the module or impl path), the function and the line. It
//! renders as `Type.method:line` and [`StackFrame::parse`] is the inverse.
//!
//! Frames come from three places:
//!
//! - explicitly, through [`StackFrame::new`] or [`StackFrame::parse`]
//! - the call site, through the [`here!`](crate::here) macro
//! - a walk of the real stack ([`capture_current`], `backtrace` feature)

use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, RegistryResult};

/// One call-stack location. Equality and hashing cover all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackFrame {
    declaring_type: String,
    method: String,
    line: u32,
}

impl StackFrame {
    /// Frame from its parts, taken as given.
    ///
    /// [`parse`](Self::parse) reads the method after the last `.` and the
    /// line after the last `:`, so the rendered form only parses back to an
    /// equal frame when `method` contains neither.
    pub fn new(declaring_type: impl Into<String>, method: impl Into<String>, line: u32) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method: method.into(),
            line,
        }
    }

    /// Parse text of the form `Type.method:line`.
    ///
    /// The line number follows the last `:`; the method name follows the
    /// last `.` before that. Either separator missing, or a line that is
    /// not an unsigned integer, is a [`RegistryError::FrameFormat`].
    ///
    /// ```
    /// use faultline_core::StackFrame;
    /// let frame = StackFrame::parse("app::store::Disk.flush:42").unwrap();
    /// assert_eq!(frame.declaring_type(), "app::store::Disk");
    /// assert_eq!(frame.method(), "flush");
    /// assert_eq!(frame.line(), 42);
    /// ```
    pub fn parse(text: &str) -> RegistryResult<Self> {
        let colon = text
            .rfind(':')
            .ok_or_else(|| RegistryError::frame_format(text, "missing ':' before line number"))?;
        let line = text[colon + 1..]
            .parse::<u32>()
            .map_err(|_| RegistryError::frame_format(text, "line number is not an integer"))?;

        let head = &text[..colon];
        let dot = head
            .rfind('.')
            .ok_or_else(|| RegistryError::frame_format(text, "missing '.' before method name"))?;

        Ok(Self::new(&head[..dot], &head[dot + 1..], line))
    }

    /// Build a frame from a Rust function path such as `crate::module::func`.
    ///
    /// The last path segment becomes the method, everything before it the
    /// declaring type. Trailing closure segments are folded into the
    /// enclosing function. Used by [`here!`](crate::here).
    pub fn from_fn_path(path: &str, line: u32) -> Self {
        let mut path = path;
        while let Some(stripped) = path.strip_suffix("::{{closure}}") {
            path = stripped;
        }
        split_symbol(path, line)
    }

    #[inline]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.declaring_type, self.method, self.line)
    }
}

impl FromStr for StackFrame {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Frame for the current call site.
///
/// Resolves the enclosing function through a nested marker fn, so the
/// result names the caller's module, function and line.
///
/// ```
/// use faultline_core::here;
/// fn load() -> faultline_core::StackFrame { here!() }
/// let frame = load();
/// assert_eq!(frame.method(), "load");
/// ```
#[macro_export]
macro_rules! here {
    () => {{
        fn __faultline_here() {}
        let path = ::std::any::type_name_of_val(&__faultline_here);
        $crate::StackFrame::from_fn_path(
            path.strip_suffix("::__faultline_here").unwrap_or(path),
            line!(),
        )
    }};
}

fn split_symbol(symbol: &str, line: u32) -> StackFrame {
    let (declaring_type, method) = match symbol.rfind("::") {
        Some(idx) => (&symbol[..idx], &symbol[idx + 2..]),
        None => ("", symbol),
    };
    StackFrame::new(declaring_type, method_segment(method), line)
}

/// Replace the render separators in a symbol's last segment, e.g.
/// `call_once{{vtable.shim}}` becomes `call_once{{vtable_shim}}`.
fn method_segment(method: &str) -> String {
    method.replace(['.', ':'], "_")
}

/// Drop the `::h0123456789abcdef` hash rustc appends to unresolved symbols.
fn strip_symbol_hash(symbol: &str) -> &str {
    if let Some(idx) = symbol.rfind("::h") {
        let hash = &symbol[idx + 3..];
        if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return &symbol[..idx];
        }
    }
    symbol
}

/// Parse the rendered form of `std::backtrace::Backtrace` into frames.
///
/// Each frame is a `N: symbol` line optionally followed by
/// `at path:line:col`. Frames without a location get line 0.
pub fn parse_backtrace(rendered: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut pending: Option<(&str, u32)> = None;

    for raw in rendered.lines() {
        let line = raw.trim();

        if let Some(symbol) = frame_header(line) {
            if let Some((symbol, lineno)) = pending.take() {
                frames.push(split_symbol(strip_symbol_hash(symbol), lineno));
            }
            pending = Some((symbol, 0));
        } else if let Some(location) = line.strip_prefix("at ") {
            // inlined frames repeat `at`; keep the first location
            if let Some((_, lineno)) = pending.as_mut() {
                if *lineno == 0 {
                    *lineno = location_line(location).unwrap_or(0);
                }
            }
        }
    }
    if let Some((symbol, lineno)) = pending {
        frames.push(split_symbol(strip_symbol_hash(symbol), lineno));
    }
    frames
}

/// `"12: crate::f"` -> `Some("crate::f")`
fn frame_header(line: &str) -> Option<&str> {
    let (index, symbol) = line.split_once(": ")?;
    if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
        Some(symbol.trim())
    } else {
        None
    }
}

/// `"./src/lib.rs:10:5"` -> `Some(10)`; also accepts a location without column.
fn location_line(location: &str) -> Option<u32> {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next()?;
    let prev = parts.next()?;
    match parts.next() {
        Some(_) => prev.parse().ok(),
        None => last.parse().ok(),
    }
}

/// True for frames that belong to the stack walk itself.
fn is_capture_machinery(frame: &StackFrame) -> bool {
    const CRATE_PREFIX: &str = concat!(env!("CARGO_CRATE_NAME"), "::");
    let ty = frame.declaring_type();
    ty.starts_with("std::backtrace")
        || ty.starts_with("backtrace::")
        || ty.starts_with(CRATE_PREFIX)
        || ty == env!("CARGO_CRATE_NAME")
}

cfg_if::cfg_if! {
    if #[cfg(feature = "backtrace")] {
        /// Walk the current stack, innermost caller first.
        ///
        /// Frames belonging to the walk itself (std backtrace internals and
        /// this crate) are dropped from the top so `frames[0]` is the code
        /// that asked for the capture.
        pub fn capture_current() -> Vec<StackFrame> {
            let rendered = std::backtrace::Backtrace::force_capture().to_string();
            parse_backtrace(&rendered)
                .into_iter()
                .skip_while(is_capture_machinery)
                .collect()
        }
    } else {
        /// Stack walking is compiled out; always empty.
        pub fn capture_current() -> Vec<StackFrame> {
            Vec::new()
        }
    }
}

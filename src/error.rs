use std::backtrace::Backtrace;
#[cfg(feature = "backtrace")]
use std::backtrace::BacktraceStatus;
use std::borrow::Borrow;
use std::borrow::Cow;
use std::error;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;
use std::mem::transmute;
use std::ops::Deref;


mod private {
    use super::*;

    pub trait Sealed {}

    impl<T> Sealed for Option<T> {}
    impl<T, E> Sealed for Result<T, E> {}
    impl Sealed for &'static str {}
    impl Sealed for String {}
    impl Sealed for Error {}

    impl Sealed for io::Error {}
}


/// A `str` replacement whose owned representation is a `Box<str>` and
/// not a `String`.
#[derive(Debug)]
#[repr(transparent)]
#[doc(hidden)]
pub struct Str(str);

impl ToOwned for Str {
    type Owned = Box<str>;

    #[inline]
    fn to_owned(&self) -> Self::Owned {
        self.0.to_string().into_boxed_str()
    }
}

impl Borrow<Str> for Box<str> {
    #[inline]
    fn borrow(&self) -> &Str {
        // SAFETY: `Str` is `repr(transparent)` and so `&str` and `&Str`
        //         can trivially be converted into each other.
        unsafe { transmute::<&str, &Str>(self.deref()) }
    }
}

impl Deref for Str {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// For convenient use in `format!`, for example.
impl Display for Str {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}


/// A helper trait to abstracting over various string types, allowing
/// for conversion into a `Cow<'static, Str>`. This is the `Cow`
/// enabled equivalent of `ToString`.
pub trait IntoCowStr: private::Sealed {
    /// Convert the object into a `Cow<'static, Str>`.
    fn into_cow_str(self) -> Cow<'static, Str>;
}

impl IntoCowStr for &'static str {
    fn into_cow_str(self) -> Cow<'static, Str> {
        // SAFETY: `Str` is `repr(transparent)` and so `&str` and `&Str`
        //         can trivially be converted into each other.
        let other = unsafe { transmute::<&str, &Str>(self) };
        Cow::Borrowed(other)
    }
}

impl IntoCowStr for String {
    fn into_cow_str(self) -> Cow<'static, Str> {
        Cow::Owned(self.into_boxed_str())
    }
}


/// The kind of an [`Error`].
///
/// Every failure surfaced by this crate is classified into exactly one
/// of these kinds, so that callers can tell an address that is simply
/// not covered apart from a binary that could not be opened.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A construction or configuration parameter was rejected.
    InvalidArgument,
    /// The queried address (or required debug information) is not
    /// covered by any symbol, line entry, or mapped range.
    NotFound,
    /// An ELF or DWARF structure is invalid: truncated headers, bad
    /// section offsets, and the like.
    MalformedBinary,
    /// Opening or reading the binary or a candidate debug file failed.
    Io,
    /// No file descriptor could be provided.
    ResourceExhausted,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "entity not found",
            Self::MalformedBinary => "malformed binary",
            Self::Io => "input/output error",
            Self::ResourceExhausted => "resource exhausted",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}


#[derive(Debug)]
enum Source {
    Io(io::Error),
    Message(Box<str>),
    None,
}


struct ErrorImpl {
    kind: ErrorKind,
    source: Source,
    /// Context layers, from the innermost to the outermost one.
    context: Vec<Cow<'static, Str>>,
    backtrace: Backtrace,
}


/// The error type used by the library.
///
/// Errors carry an [`ErrorKind`], an optional underlying I/O error,
/// and any number of context layers. The regular `Display`
/// representation only shows the outermost layer; use the alternate
/// form (`{:#}`) to print the entire chain.
pub struct Error {
    error: Box<ErrorImpl>,
}

impl Error {
    fn new(kind: ErrorKind, source: Source) -> Self {
        #[cfg(feature = "backtrace")]
        let backtrace = Backtrace::capture();
        #[cfg(not(feature = "backtrace"))]
        let backtrace = Backtrace::disabled();

        Self {
            error: Box::new(ErrorImpl {
                kind,
                source,
                context: Vec::new(),
                backtrace,
            }),
        }
    }

    fn with_message<M>(kind: ErrorKind, message: M) -> Self
    where
        M: ToString,
    {
        Self::new(kind, Source::Message(message.to_string().into_boxed_str()))
    }

    #[doc(hidden)]
    pub fn with_invalid_argument<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_message(ErrorKind::InvalidArgument, message)
    }

    #[doc(hidden)]
    pub fn with_not_found<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_message(ErrorKind::NotFound, message)
    }

    #[doc(hidden)]
    pub fn with_malformed_binary<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_message(ErrorKind::MalformedBinary, message)
    }

    #[doc(hidden)]
    pub fn with_resource_exhausted<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_message(ErrorKind::ResourceExhausted, message)
    }

    /// Retrieve the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    /// Retrieve the backtrace captured when the error was created.
    ///
    /// Capturing is subject to the usual `RUST_BACKTRACE` and
    /// `RUST_LIB_BACKTRACE` environment variables and requires the
    /// `backtrace` feature.
    #[inline]
    pub fn backtrace(&self) -> &Backtrace {
        &self.error.backtrace
    }

    fn layer_context(mut self, context: Cow<'static, Str>) -> Self {
        let () = self.error.context.push(context);
        self
    }

    fn fmt_innermost(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.error.source {
            Source::Io(err) => Display::fmt(err, f),
            Source::Message(msg) => f.write_str(msg),
            Source::None => Display::fmt(&self.error.kind, f),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if f.alternate() {
            let ErrorImpl {
                kind,
                source,
                context,
                backtrace,
            } = &*self.error;

            f.debug_struct(stringify!(Error))
                .field("kind", kind)
                .field("source", source)
                .field("context", context)
                .field("backtrace", backtrace)
                .finish()
        } else {
            let () = Display::fmt(&format_args!("{self:#}"), f)?;

            #[cfg(feature = "backtrace")]
            {
                if let BacktraceStatus::Captured = self.error.backtrace.status() {
                    let () = write!(f, "\n\nStack backtrace:\n{}", self.error.backtrace)?;
                }
            }
            Ok(())
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if f.alternate() {
            for context in self.error.context.iter().rev() {
                let () = write!(f, "{context}: ")?;
            }
            self.fmt_innermost(f)
        } else if let Some(context) = self.error.context.last() {
            Display::fmt(context, f)
        } else {
            self.fmt_innermost(f)
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.error.source {
            Source::Io(err) => Some(err),
            Source::Message(..) | Source::None => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        let kind = match other.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) => ErrorKind::ResourceExhausted,
            _ => ErrorKind::Io,
        };
        Self::new(kind, Source::Io(other))
    }
}

impl From<gimli::Error> for Error {
    fn from(other: gimli::Error) -> Self {
        Self::with_message(ErrorKind::MalformedBinary, other)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, Source::None)
    }
}


/// A trait providing ergonomic chaining capabilities to [`Error`].
pub trait ErrorExt: private::Sealed {
    /// The output type produced by [`context`](Self::context) and
    /// [`with_context`](Self::with_context).
    type Output;

    /// Add context to this error.
    // If we had specialization of sorts we could be more lenient as to
    // what we can accept, but for now this method always works with
    // static strings and nothing else.
    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr;

    /// Add context to this error, using a closure for lazy evaluation.
    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C;
}

impl ErrorExt for Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr,
    {
        self.layer_context(context.into_cow_str())
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C,
    {
        self.layer_context(f().into_cow_str())
    }
}

impl<T, E> ErrorExt for Result<T, E>
where
    E: ErrorExt,
{
    type Output = Result<T, E::Output>;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr,
    {
        match self {
            Ok(val) => Ok(val),
            Err(err) => Err(err.context(context)),
        }
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C,
    {
        match self {
            Ok(val) => Ok(val),
            Err(err) => Err(err.with_context(f)),
        }
    }
}

impl ErrorExt for io::Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: IntoCowStr,
    {
        Error::from(self).context(context)
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: IntoCowStr,
        F: FnOnce() -> C,
    {
        Error::from(self).with_context(f)
    }
}


/// A trait providing conversion shortcuts for creating `Error`
/// instances from `Option`s.
pub trait IntoError<T>: private::Sealed
where
    Self: Sized,
{
    /// Convert `None` into an [`Error`] of the given kind, using the
    /// context produced by `f`.
    fn ok_or_error<C, F>(self, kind: ErrorKind, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C;

    /// Convert `None` into an [`ErrorKind::InvalidArgument`] error.
    #[inline]
    fn ok_or_invalid_argument<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::InvalidArgument, f)
    }

    /// Convert `None` into an [`ErrorKind::NotFound`] error.
    #[inline]
    fn ok_or_not_found<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::NotFound, f)
    }

    /// Convert `None` into an [`ErrorKind::MalformedBinary`] error.
    #[inline]
    fn ok_or_malformed<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::MalformedBinary, f)
    }
}

impl<T> IntoError<T> for Option<T> {
    #[inline]
    fn ok_or_error<C, F>(self, kind: ErrorKind, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::with_message(kind, f()))
    }
}

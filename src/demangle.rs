use std::borrow::Cow;


/// Demangle a Rust or C++ symbol name, returning it unchanged if it is
/// neither.
#[cfg(feature = "demangle")]
pub(crate) fn demangle(name: &str) -> Cow<'_, str> {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        // The alternate form omits the trailing hash.
        return Cow::Owned(format!("{demangled:#}"))
    }

    if name.starts_with("_Z") {
        if let Ok(symbol) = cpp_demangle::Symbol::new(name) {
            if let Ok(demangled) = symbol.demangle(&cpp_demangle::DemangleOptions::default()) {
                return Cow::Owned(demangled)
            }
        }
    }

    Cow::Borrowed(name)
}

#[cfg(not(feature = "demangle"))]
#[inline]
pub(crate) fn demangle(name: &str) -> Cow<'_, str> {
    Cow::Borrowed(name)
}


/// Format a function name along with the offset of an address from its
/// start.
///
/// The offset is omitted if it is zero.
pub(crate) fn format_function_name(name: &str, offset: u64) -> String {
    let name = demangle(name);
    if offset == 0 {
        name.into_owned()
    } else {
        format!("{name}+{offset:#x}")
    }
}

// src/bus/methods.rs

//! Static description of the interfaces this service exports.
//!
//! Every method is a variant of a closed enum whose [`Interface::spec`]
//! gives its name and signature, so lookup, argument checking and the
//! introspection document all come from one table.

/// Standard introspection interface.
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
pub const ECHO_INTERFACE: &str = "com.example.WinBus.Echo";
pub const WINDOW_INTERFACE: &str = "com.example.WinBus.Window";

/// Standard error names used in error replies.
pub mod error_names {
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
}

const INTROSPECT_DOCTYPE: &str = "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    /// Single complete type signature.
    pub signature: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: &'static str,
    pub inputs: &'static [ArgSpec],
    pub outputs: &'static [ArgSpec],
}

impl MethodSpec {
    /// Signature a call must carry, e.g. `"s"` or `""`.
    pub fn input_signature(&self) -> String {
        self.inputs.iter().map(|a| a.signature).collect()
    }
}

/// An interface whose methods form a closed set.
pub trait Interface: Copy + Sized + 'static {
    const NAME: &'static str;
    const METHODS: &'static [Self];

    fn spec(self) -> &'static MethodSpec;

    fn from_member(member: &str) -> Option<Self> {
        Self::METHODS.iter().copied().find(|m| m.spec().name == member)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectableMethod {
    Introspect,
}

impl Interface for IntrospectableMethod {
    const NAME: &'static str = INTROSPECTABLE_INTERFACE;
    const METHODS: &'static [Self] = &[IntrospectableMethod::Introspect];

    fn spec(self) -> &'static MethodSpec {
        match self {
            IntrospectableMethod::Introspect => &MethodSpec {
                name: "Introspect",
                inputs: &[],
                outputs: &[ArgSpec { name: "xml_data", signature: "s" }],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMethod {
    /// Returns its string argument unchanged.
    Echo,
}

impl Interface for EchoMethod {
    const NAME: &'static str = ECHO_INTERFACE;
    const METHODS: &'static [Self] = &[EchoMethod::Echo];

    fn spec(self) -> &'static MethodSpec {
        match self {
            EchoMethod::Echo => &MethodSpec {
                name: "Echo",
                inputs: &[ArgSpec { name: "text", signature: "s" }],
                outputs: &[ArgSpec { name: "text", signature: "s" }],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMethod {
    /// Sets the fill color (packed `0xRRGGBB`) and repaints the window.
    SetColor,
}

impl Interface for WindowMethod {
    const NAME: &'static str = WINDOW_INTERFACE;
    const METHODS: &'static [Self] = &[WindowMethod::SetColor];

    fn spec(self) -> &'static MethodSpec {
        match self {
            WindowMethod::SetColor => &MethodSpec {
                name: "SetColor",
                inputs: &[ArgSpec { name: "color", signature: "u" }],
                outputs: &[],
            },
        }
    }
}

fn push_interface<I: Interface>(out: &mut String) {
    out.push_str(&format!("  <interface name=\"{}\">\n", I::NAME));
    for method in I::METHODS {
        let spec = method.spec();
        out.push_str(&format!("    <method name=\"{}\">\n", spec.name));
        for (args, direction) in [(spec.inputs, "in"), (spec.outputs, "out")] {
            for arg in args {
                out.push_str(&format!(
                    "      <arg name=\"{}\" type=\"{}\" direction=\"{}\"/>\n",
                    arg.name, arg.signature, direction
                ));
            }
        }
        out.push_str("    </method>\n");
    }
    out.push_str("  </interface>\n");
}

/// Introspection document for an object implementing `I`.
pub fn introspection_xml<I: Interface>() -> String {
    let mut out = String::from(INTROSPECT_DOCTYPE);
    out.push_str("<node>\n");
    push_interface::<IntrospectableMethod>(&mut out);
    push_interface::<I>(&mut out);
    out.push_str("</node>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_resolve_to_their_variant() {
        assert_eq!(EchoMethod::from_member("Echo"), Some(EchoMethod::Echo));
        assert_eq!(WindowMethod::from_member("SetColor"), Some(WindowMethod::SetColor));
        assert_eq!(WindowMethod::from_member("setcolor"), None);
        assert_eq!(WindowMethod::from_member("Echo"), None);
    }

    #[test]
    fn input_signatures_come_from_the_table() {
        assert_eq!(EchoMethod::Echo.spec().input_signature(), "s");
        assert_eq!(WindowMethod::SetColor.spec().input_signature(), "u");
        assert_eq!(IntrospectableMethod::Introspect.spec().input_signature(), "");
    }

    #[test]
    fn introspection_lists_both_interfaces_and_all_arguments() {
        let xml = introspection_xml::<WindowMethod>();
        assert!(xml.starts_with("<!DOCTYPE node"));
        assert!(xml.contains("<interface name=\"org.freedesktop.DBus.Introspectable\">"));
        assert!(xml.contains("<interface name=\"com.example.WinBus.Window\">"));
        assert!(xml.contains("<method name=\"SetColor\">"));
        assert!(xml.contains("<arg name=\"color\" type=\"u\" direction=\"in\"/>"));
        assert!(!xml.contains("Echo"));

        let echo = introspection_xml::<EchoMethod>();
        assert!(echo.contains("<arg name=\"text\" type=\"s\" direction=\"out\"/>"));
    }
}

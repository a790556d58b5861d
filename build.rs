// build.rs

fn main() {
    // --- Link against the system libraries behind the enabled backends ---
    // pkg-config first; if it fails we fall back to plain -l flags and
    // hope the libraries live in a standard search path.
    let mut libraries: Vec<(&str, &str)> = Vec::new();
    if std::env::var_os("CARGO_FEATURE_X11").is_some() {
        libraries.push(("x11", "X11"));
    }
    if std::env::var_os("CARGO_FEATURE_DBUS").is_some() {
        libraries.push(("dbus-1", "dbus-1"));
    }

    for (pkg, link_name) in &libraries {
        if pkg_config::probe_library(pkg).is_err() {
            eprintln!(
                "pkg-config failed for library '{}'. Falling back to manual linking.",
                pkg
            );
            println!("cargo:rustc-link-lib={}", link_name);
            println!("cargo:rustc-link-search=/usr/lib");
        }
    }

    println!("cargo:rerun-if-changed=build.rs");
}

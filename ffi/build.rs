fn main() {
    let crate_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();

    println!("cargo:rerun-if-changed=src");

    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("FRAMEMGR_H")
        .with_header("/* Generated by cbindgen from the framemgr-ffi crate. */")
        .generate()
        .expect("Unable to generate C FFI bindings")
        .write_to_file("framemgr.h");
}

use std::env;

fn main() {
    if let Ok(dir) = env::var("HELM_SOLVER_DIR") {
        println!("cargo:rustc-link-search={}/lib", dir);
    }
    println!("cargo:rustc-link-search=/usr/local/lib");
    println!("cargo:rustc-link-lib=helmsolver");
    println!("cargo:rerun-if-env-changed=HELM_SOLVER_DIR");
}

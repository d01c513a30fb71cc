fn main() {
    println!("cargo:rerun-if-env-changed=MDCREATE_VERSION");
}

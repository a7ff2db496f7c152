use std::env;
use std::fs;
use clap::Shell;

mod sq_paste_cli {
    include!("src/sq_paste_cli.rs");
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/sq_paste_cli.rs");

    let outdir = match env::var_os("CARGO_TARGET_DIR") {
        None => return,
        Some(outdir) => outdir,
    };
    fs::create_dir_all(&outdir).unwrap();
    let mut sq_paste = sq_paste_cli::build();
    for shell in &[Shell::Bash, Shell::Fish, Shell::Zsh, Shell::PowerShell,
                   Shell::Elvish] {
        sq_paste.gen_completions("sq-paste", *shell, &outdir);
    }
}

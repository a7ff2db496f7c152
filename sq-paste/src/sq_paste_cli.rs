/// Command-line parser for sq-paste.

use clap::{App, Arg};

pub fn build() -> App<'static, 'static> {
    configure(App::new("sq-paste"))
}

/// Defines the CLI.
pub fn configure(app: App<'static, 'static>) -> App<'static, 'static> {
    app
        .version(env!("CARGO_PKG_VERSION"))
        .about("Encrypts, decrypts, signs or verifies a message, \
                depending on the key and the message given.")
        .long_about(
            "Encrypts, decrypts, signs or verifies a message, \
             depending on the key and the message given.

With a certificate, a plain text message is encrypted for it, and a \
cleartext signed message is verified using it.  With a private key, \
an encrypted message is decrypted, a cleartext signed message is \
verified, and anything else is signed.

If the private key is protected by a password, it is read from \
--passphrase-file, or prompted for.")
        .arg(Arg::with_name("key")
             .long("key").value_name("FILE")
             .required(true)
             .help("Reads the key or certificate from FILE"))
        .arg(Arg::with_name("message")
             .long("message").value_name("FILE")
             .help("Reads the message from FILE instead of stdin"))
        .arg(Arg::with_name("output")
             .short("o").long("output").value_name("FILE")
             .help("Sets the output file to use"))
        .arg(Arg::with_name("force")
             .short("f").long("force")
             .help("Overwrite existing files"))
        .arg(Arg::with_name("passphrase-file")
             .long("passphrase-file").value_name("FILE")
             .help("Reads the password protecting the private key \
                    from FILE instead of prompting for it"))
        .arg(Arg::with_name("public")
             .long("public")
             .help("Uses a private key as if only its certificate \
                    had been given"))
        .arg(Arg::with_name("debounce")
             .long("debounce").value_name("MILLISECONDS")
             .env("SQ_PASTE_DEBOUNCE_MS")
             .help("Waits this long for the message to settle"))
}

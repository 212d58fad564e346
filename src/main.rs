use ratchet::core::report::status_line;

fn main() {
    match ratchet::run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", status_line(e.severity(), e.code(), &e.to_string()));
            std::process::exit(e.severity().exit_code());
        }
    }
}

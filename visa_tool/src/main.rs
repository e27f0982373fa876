use std::io;
use std::process::exit;

use env_logger::Env;

use visa_tool::app::{self, Options};
use visa_tool::visa::Visa;

fn main() {
    let matches = app::command().get_matches();
    let options = match Options::from_matches(&matches) {
        Ok(options) => options,
        Err(err) => {
            println!("{}", err);
            exit(1);
        }
    };

    if options.verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("visa_tool=debug")).init();
    } else {
        env_logger::init();
    }

    let visa = match Visa::load(options.visa_lib.as_deref()) {
        Ok(visa) => visa,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };
    log::debug!("Using VISA library `{}`", visa.path());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let code = match app::run(&visa, &options, &mut out) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };
    drop(out);
    drop(visa);
    exit(code);
}

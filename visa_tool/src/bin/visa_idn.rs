use std::process::exit;

use visa_tool::visa::{Instrument, SessionConfig, Visa};

const RESOURCE: &str = "GPIB0::10::INSTR";

fn idn() -> visa_tool::Result<String> {
    let visa = Visa::load(None)?;
    let mut instr = Instrument::open(&visa, RESOURCE, &SessionConfig::default())?;
    let ret = instr.query("*IDN?")?;
    instr.close()?;
    Ok(ret)
}

fn main() {
    env_logger::init();
    match idn() {
        Ok(idn) => println!("{}", idn),
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    }
}

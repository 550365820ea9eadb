//! Prints the default settings as TOML, ready to redirect into a file.

use umirs::config::Settings;

fn main() {
    match serdeconv::to_toml_string(&Settings::default()) {
        Ok(config) => println!("{}", config),
        Err(error) => panic!("Failed to render the default settings: {}", error),
    }
}

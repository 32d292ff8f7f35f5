//! # tmplc
//!
//! CLI front end for the template preprocessor. It only parses arguments,
//! configures logging, and calls into the `tmplc` library.
extern crate tmplc;

mod cli;

use cli::*;

use std::collections::HashMap;

use log::{error, info};
use tmplc::interpolate::NoSecrets;
use tmplc::vm::Value;
use tmplc::{run_template, RenderedTo, RunOptions};

fn main() {
    let args = Cli::init();

    simple_logger::init_with_level(args.verbosity.into()).unwrap();

    let mut env = HashMap::new();
    for (name, value) in args.defines {
        env.insert(name, Value::Str(value));
    }

    let argv = args.args.into_iter().map(Value::Str).collect();

    let options = RunOptions {
        input_dir: args.input_dir,
        output_dir: args.output_dir,
    };

    let template = match args.template.to_str() {
        Some(path) => path,
        None => {
            error!("template path is not valid UTF-8");
            std::process::exit(1);
        }
    };

    match run_template(template, env, argv, &options, &NoSecrets) {
        Ok(RenderedTo::File(path)) => {
            info!("wrote {}", path.display());
        }
        Ok(RenderedTo::Stdout(_)) => {}
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

//! Attribute command - print run-unique name attributes.

use anyhow::Result;
use clap::Args;

use provcheck_harness::UniquenessGenerator;

#[derive(Args, Debug)]
pub struct AttributeArgs {
    /// Number of attributes to generate
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,
}

pub fn execute(args: AttributeArgs) -> Result<()> {
    let generator = UniquenessGenerator::new();
    for _ in 0..args.count {
        println!("{}", generator.generate());
    }
    Ok(())
}

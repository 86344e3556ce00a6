//! Smoke tests for the allocator over the real process heap.
//!
//! `heapcheck` runs every scenario, `heapcheck -t N` only scenario `N`.
//! Exits with 0 when everything passed and 1 otherwise.

use std::{process::ExitCode, ptr};

use clap::Parser;
use heapalloc::{Allocator, Config};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "heapcheck")]
#[command(about = "Runs allocate / release / resize scenarios against the allocator")]
struct Args {
    /// Scenario to run: 1 allocate, 2 release, 3 resize
    #[arg(short = 't', long = "test")]
    test: Option<u32>,
}

type Scenario = fn(&Allocator) -> Result<(), &'static str>;

fn test_allocate(allocator: &Allocator) -> Result<(), &'static str> {
    println!("Testing allocate...");
    let first = allocator.allocate(16).ok_or("allocate failed.")?;
    let second = allocator.allocate(32).ok_or("allocate failed.")?;

    unsafe {
        ptr::write_bytes(first.as_ptr(), 0, 16);
        ptr::write_bytes(second.as_ptr(), 0, 32);
        allocator.release(Some(first));
        allocator.release(Some(second));
    }

    println!("allocate test passed.");
    Ok(())
}

fn test_release(allocator: &Allocator) -> Result<(), &'static str> {
    println!("Testing release...");
    let block = allocator.allocate(16).ok_or("allocate failed.")?;
    unsafe { allocator.release(Some(block)) };

    println!("release test passed.");
    Ok(())
}

fn test_resize(allocator: &Allocator) -> Result<(), &'static str> {
    println!("Testing resize...");
    let block = allocator.allocate(16).ok_or("allocate failed.")?;
    let block = unsafe { allocator.resize(Some(block), 32) }.ok_or("resize failed.")?;

    unsafe {
        ptr::write_bytes(block.as_ptr(), 0, 32);
        allocator.release(Some(block));
    }

    println!("resize test passed.");
    Ok(())
}

fn run(allocator: &Allocator, scenarios: &[Scenario]) -> ExitCode {
    for scenario in scenarios {
        if let Err(message) = scenario(allocator) {
            println!("{message}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(error) = allocator.validate() {
        println!("free index corrupted: {error}");
        return ExitCode::FAILURE;
    }

    info!(stats = ?allocator.stats(), "allocator state");
    println!("All tests passed.");
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let allocator = Allocator::new(Config::default());

    match args.test {
        Some(number) => {
            println!("Running test {number}...");
            let scenario: Scenario = match number {
                1 => test_allocate,
                2 => test_release,
                3 => test_resize,
                _ => {
                    println!(
                        "Invalid test number. Use 1 for allocate, 2 for release, 3 for resize."
                    );
                    return ExitCode::FAILURE;
                }
            };
            run(&allocator, &[scenario])
        }
        None => {
            println!("Running all tests...");
            run(&allocator, &[test_allocate, test_release, test_resize])
        }
    }
}

//! rvcore: run a flat RISC-V binary image

use std::env;
use std::io::Write;

use anyhow::{bail, Context};
use rvcore::config::parse_u64;
use rvcore::cpu::instruction::REG_SP;
use rvcore::cpu::AddressType;
use rvcore::{Config, Machine, MachineResult, PageAttributes};

const SYSCALL_WRITE: usize = 64;
const SYSCALL_EXIT: usize = 93;

const DEFAULT_BASE: u64 = 0x1_0000;
const STACK_TOP: u64 = 0x80_0000;
const STACK_SIZE: u64 = 256 * 1024;

const EIO: i64 = -5;
const EBADF: i64 = -9;

struct Options {
    image: String,
    base: u64,
    entry: Option<u64>,
    rv32: bool,
    precise: bool,
    max: Option<u64>,
    no_compressed: bool,
}

fn usage() {
    eprintln!("Usage: rvcore <image> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --base ADDR      Load address of the image (default 0x{:X})", DEFAULT_BASE);
    eprintln!("  --entry ADDR     Entry point (default: load address)");
    eprintln!("  --rv32           Run as RV32 instead of RV64");
    eprintln!("  --precise        Step one instruction at a time");
    eprintln!("  --max N          Instruction budget");
    eprintln!("  --no-compressed  Disable the C extension");
    eprintln!();
    eprintln!("Configuration: {}", Config::user_config_path().map(|p| p.display().to_string()).unwrap_or_default());
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Options>> {
    let mut image = None;
    let mut base = DEFAULT_BASE;
    let mut entry = None;
    let mut rv32 = false;
    let mut precise = false;
    let mut max = None;
    let mut no_compressed = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--base" => base = address_arg(&mut iter, "--base")?,
            "--entry" => entry = Some(address_arg(&mut iter, "--entry")?),
            "--max" => max = Some(address_arg(&mut iter, "--max")?),
            "--rv32" => rv32 = true,
            "--precise" => precise = true,
            "--no-compressed" => no_compressed = true,
            "--help" | "-h" => return Ok(None),
            other if other.starts_with('-') => bail!("Unknown option: {}", other),
            other => image = Some(other.to_string()),
        }
    }

    let Some(image) = image else {
        return Ok(None);
    };
    Ok(Some(Options {
        image,
        base,
        entry,
        rv32,
        precise,
        max,
        no_compressed,
    }))
}

fn address_arg<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> anyhow::Result<u64> {
    let value = iter.next().with_context(|| format!("{} needs a value", flag))?;
    parse_u64(value).with_context(|| format!("Invalid number for {}: {}", flag, value))
}

fn sys_exit<A: AddressType>(m: &mut Machine<A>) -> MachineResult<()> {
    // Exit status stays in a0
    m.stop();
    Ok(())
}

fn sys_write<A: AddressType>(m: &mut Machine<A>) -> MachineResult<()> {
    let fd = m.sysarg(0).to_u64();
    let addr = m.sysarg(1).to_u64();
    let len = m.sysarg(2).to_u64() as usize;

    let mut buf = vec![0u8; len];
    m.memory.read_bytes(addr, &mut buf)?;
    let written = match fd {
        1 => std::io::stdout().write_all(&buf),
        2 => std::io::stderr().write_all(&buf),
        _ => {
            m.set_result(EBADF as u64);
            return Ok(());
        }
    };
    match written {
        Ok(()) => m.set_result(len as u64),
        Err(e) => {
            log::warn!("write to fd {} failed: {}", fd, e);
            m.set_result(EIO as u64);
        }
    }
    Ok(())
}

fn run_image<A: AddressType>(opts: &Options, image: &[u8]) -> anyhow::Result<i32> {
    let config = Config::get();
    let mut options = config.machine_options::<A>();
    if opts.no_compressed {
        options.compressed = false;
    }
    let max = opts.max.unwrap_or(options.max_instructions);
    let mut machine = Machine::<A>::new(options);

    if image.is_empty() {
        bail!("Image is empty");
    }
    machine.memory.set_page_attr(opts.base, image.len() as u64, PageAttributes::RX);
    machine
        .memory
        .copy_to_guest(opts.base, image)
        .with_context(|| format!("Failed to load image at 0x{:X}", opts.base))?;

    let stack_base = STACK_TOP - STACK_SIZE;
    machine.memory.set_page_attr(stack_base, STACK_SIZE, PageAttributes::RW);
    machine.cpu.registers_mut().set_u64(REG_SP, STACK_TOP - 16);

    machine.install_syscall_handler(SYSCALL_EXIT, sys_exit::<A>)?;
    machine.install_syscall_handler(SYSCALL_WRITE, sys_write::<A>)?;

    let entry = opts.entry.unwrap_or(opts.base);
    log::info!(
        "Running {} bytes at 0x{:X}, entry 0x{:X}, RV{}, budget {}",
        image.len(),
        opts.base,
        entry,
        A::BITS,
        max
    );

    let result = if opts.precise {
        machine.cpu.set_pc(entry);
        machine.set_max_instructions(max);
        machine.simulate_precise()
    } else {
        machine.simulate(entry, 0, max)
    };

    let status = match result {
        Ok(true) => {
            let code = machine.sysarg(0).to_i64() as i32;
            println!("Exit status: {}", code);
            code
        }
        Ok(false) => {
            println!("Instruction budget of {} exhausted at 0x{:X}", max, machine.cpu.pc());
            -1
        }
        Err(e) => {
            println!("Exception at 0x{:X}: {}", machine.cpu.pc(), e);
            -1
        }
    };
    println!("Instructions executed: {}", machine.instruction_counter());
    println!("{}", machine.cpu.registers().to_string_int());
    Ok(status)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let opts = match parse_args(&args)? {
        Some(opts) => opts,
        None => {
            usage();
            return Ok(());
        }
    };

    let image = std::fs::read(&opts.image).with_context(|| format!("Failed to read {}", opts.image))?;

    let status = if opts.rv32 {
        run_image::<u32>(&opts, &image)?
    } else {
        run_image::<u64>(&opts, &image)?
    };
    std::process::exit(status);
}

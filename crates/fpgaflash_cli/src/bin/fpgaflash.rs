use fpgaflash_cli::{FlasherSetup, create_flasher};

fn usage() -> ! {
    eprintln!(
        "Usage: fpgaflash <setup.toml> <command> [args]\n\
         \n\
         Commands:\n\
           flash <path> [chunk_size]   stream a bitstream into the FPGA\n\
           list                        list stored bitstreams\n\
           delete <path>               remove a stored bitstream\n\
           info                        report store usage\n\
           stats                       report the last flash timing\n\
         \n\
         Examples:\n\
           fpgaflash config/host.toml flash /led_blink.bin\n\
           fpgaflash config/host.toml list"
    );
    std::process::exit(2)
}

fn parse_usize(s: &str, name: &str) -> usize {
    s.parse::<usize>().unwrap_or_else(|_| {
        eprintln!("Invalid {name}: {s}");
        usage()
    })
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let setup_path = args.next().unwrap_or_else(|| usage());
    let command = args.next().unwrap_or_else(|| usage());

    let setup = FlasherSetup::from_file(&setup_path).unwrap_or_else(|e| {
        eprintln!("failed to load setup: {e}");
        std::process::exit(2)
    });
    let mut flasher = create_flasher(&setup).unwrap_or_else(|e| {
        eprintln!("failed to initialize flasher: {e}");
        std::process::exit(1)
    });

    let outcome = match command.as_str() {
        "flash" => {
            let path = args.next().unwrap_or_else(|| usage());
            let chunk_size = args
                .next()
                .map(|s| parse_usize(&s, "chunk_size"))
                .unwrap_or(setup.flasher.flash.chunk_size);
            flasher.flash(&path, chunk_size).map(|()| {
                println!(
                    "flashed {path}: {} ms, {:.2} KB/s",
                    flasher.last_flash_time(),
                    flasher.transfer_rate()
                );
            })
        }
        "list" => {
            for entry in flasher.list_files() {
                println!("{} - {} bytes", entry.name, entry.size);
            }
            Ok(())
        }
        "delete" => {
            let path = args.next().unwrap_or_else(|| usage());
            flasher.delete_file(&path).map(|()| {
                println!("deleted {path}");
            })
        }
        "info" => {
            let usage = flasher.fs_usage();
            println!(
                "total {} KB, used {} KB",
                usage.total_bytes / 1024,
                usage.used_bytes / 1024
            );
            Ok(())
        }
        "stats" => {
            flasher.log_stats();
            println!(
                "last flash: {} ms, {:.2} KB/s",
                flasher.last_flash_time(),
                flasher.transfer_rate()
            );
            Ok(())
        }
        _ => usage(),
    };

    if let Err(e) = outcome {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

use kernport::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use kernport::cli::{Command, KernportCli, OutputFormat};
    use kernport::policy::{ExecutionPolicy, Mode};

    #[test]
    fn bench_command_parses_lists() {
        let cli = KernportCli::parse_from([
            "kernport",
            "bench",
            "--shape",
            "128,8",
            "--policies",
            "seq,threaded:4,device-async:64",
            "--format",
            "json",
        ]);
        match cli.command() {
            Command::Bench {
                shape,
                policies,
                iterations,
                format,
                explain,
            } => {
                assert_eq!(shape, &[128, 8]);
                assert_eq!(
                    policies,
                    &[
                        ExecutionPolicy::Sequential,
                        ExecutionPolicy::Threaded { min_chunk: 4 },
                        ExecutionPolicy::Device {
                            block_size: 64,
                            mode: Mode::Async
                        },
                    ]
                );
                assert_eq!(*iterations, 50);
                assert_eq!(*format, OutputFormat::Json);
                assert!(!explain);
            }
            other => panic!("expected bench command, got {other:?}"),
        }
    }

    #[test]
    fn bad_policy_is_a_usage_error() {
        assert!(KernportCli::try_parse_from(["kernport", "bench", "--policies", "simd"]).is_err());
    }
}

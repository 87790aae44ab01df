use std::process::ExitCode;

use exec_forge::{DiagnosticSink, cli, logging};

fn main() -> ExitCode {
    let config = match cli::parse(std::env::args_os()) {
        Ok(config) => config,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    logging::init();

    let mut sink = DiagnosticSink::default();
    let result = config.build().and_then(|config| config.start(&mut sink));

    match result {
        // stdout may already belong to the daemon: stay silent on success.
        Ok(outcome) => {
            tracing::debug!(pid = outcome.pid, "daemon launched");
            ExitCode::SUCCESS
        }
        Err(err) => {
            sink.report(&err);
            ExitCode::FAILURE
        }
    }
}

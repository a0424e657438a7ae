mod cli_server;
mod config;
#[cfg(unix)]
mod process;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = history_viewer::parse_cli();
    match history_viewer::run(&cli) {
        Ok(()) => Ok(()),
        Err(err) => {
            let exit_code = history_viewer::exit_code_for_error(&err);
            history_viewer::write_cli_error(&err, &mut std::io::stderr())?;
            std::process::exit(exit_code);
        }
    }
}

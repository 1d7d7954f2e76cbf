//! Interface de linha de comando do polyglot baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, worker,
//! translate) e flags globais (--max-retries, --verbose).

use clap::{Parser, Subcommand};

/// polyglot: despacho assíncrono de traduções para um pool de workers.
#[derive(Debug, Parser)]
#[command(name = "polyglot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número máximo de reenvios por job.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita logs de depuração.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o pipeline completo em memória contra um worker que duplica eventos.
    Demo,

    /// Serve o worker simulado via TCP.
    Worker {
        /// Endereço de escuta (padrão: `worker_addr` da configuração).
        #[arg(long)]
        listen: Option<String>,
    },

    /// Envia um texto para tradução a um worker TCP e aguarda o resultado.
    Translate {
        /// Texto a traduzir.
        text: String,

        /// Idioma de origem.
        #[arg(long, default_value = "en")]
        from: String,

        /// Idiomas de destino (repetível ou separados por vírgula).
        #[arg(long = "to", required = true, value_delimiter = ',')]
        to: Vec<String>,

        /// Endereço do worker (padrão: `worker_addr` da configuração).
        #[arg(long)]
        worker: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_translate_subcommand() {
        let cli = Cli::parse_from([
            "polyglot", "translate", "bom dia", "--from", "pt", "--to", "en,es", "--to", "fr",
        ]);
        match cli.command {
            Command::Translate {
                text,
                from,
                to,
                worker,
            } => {
                assert_eq!(text, "bom dia");
                assert_eq!(from, "pt");
                assert_eq!(to, vec!["en", "es", "fr"]);
                assert!(worker.is_none());
            }
            _ => panic!("expected Translate command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["polyglot", "--max-retries", "5", "--verbose", "demo"]);
        assert!(cli.verbose);
        assert_eq!(cli.max_retries, Some(5));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn cli_parses_worker_subcommand() {
        let cli = Cli::parse_from(["polyglot", "worker", "--listen", "0.0.0.0:7000"]);
        match cli.command {
            Command::Worker { listen } => assert_eq!(listen.as_deref(), Some("0.0.0.0:7000")),
            _ => panic!("expected Worker command"),
        }
    }

    #[test]
    fn translate_requires_target() {
        assert!(Cli::try_parse_from(["polyglot", "translate", "hi"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}

//! Interface de terminal do polyglot: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner enquanto um job aguarda o worker e
//! `console` para colorir o resultado final e o painel de diagnóstico.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use polyglot::{CorrelationId, StatsSnapshot, TranslationError, TranslationResults};

/// Indicador visual para um job de tradução em andamento.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    dim: Style,
}

impl JobProgress {
    /// Inicia o spinner com o id de correlação do job.
    pub fn start(correlation_id: &CorrelationId, targets: &[String]) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{correlation_id} → {}", targets.join(", ")));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Finaliza o spinner e imprime o desfecho do job.
    pub fn complete(&self, outcome: &Result<TranslationResults, TranslationError>) {
        self.pb.finish_and_clear();
        print_outcome(outcome, &self.green, &self.red, &self.dim);
    }
}

/// Imprime um desfecho sem spinner (usado pela demo).
pub fn report(outcome: &Result<TranslationResults, TranslationError>) {
    print_outcome(
        outcome,
        &Style::new().green().bold(),
        &Style::new().red().bold(),
        &Style::new().dim(),
    );
}

fn print_outcome(
    outcome: &Result<TranslationResults, TranslationError>,
    green: &Style,
    red: &Style,
    dim: &Style,
) {
    match outcome {
        Ok(results) => {
            println!("  {} translated into {} languages", green.apply_to("✓"), results.len());
            for r in results.iter() {
                println!("    {} {}", dim.apply_to(format!("{:>4}", r.language)), r.text);
            }
        }
        Err(e) => {
            println!("  {} {} ({})", red.apply_to("✗"), e, dim.apply_to(e.kind()));
        }
    }
}

/// Imprime os contadores do registro em JSON.
pub fn print_stats(stats: &StatsSnapshot) {
    println!();
    println!("{}", Style::new().yellow().apply_to("─── Dispatch Stats ───"));
    println!("{}", serde_json::to_string_pretty(stats).unwrap_or_default());
}

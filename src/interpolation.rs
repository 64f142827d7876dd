//! interpolation.rs — Estimativa de tempo ativo a partir de observações esparsas
//!
//! Entre duas observações o estado é considerado constante e igual ao da
//! observação anterior. As bordas da janela são extrapoladas a partir da
//! primeira e da última observação.

use crate::schedule::{Schedule, minutes_between};
use crate::types::StatusObservation;
use chrono::{DateTime, Utc};

/// Estima os minutos ativos dentro do horário de funcionamento de uma janela.
///
/// `observations` precisa estar em ordem crescente de instante. O resultado é
/// sempre limitado a `[0, scheduled_minutes]`.
///
/// - Sem observações: 0 (ausência de dados conta como indisponibilidade).
/// - Uma observação: o estado dela vale para a janela inteira.
/// - Duas ou mais: interpolação em degrau, ignorando observações fora do
///   horário de funcionamento (lojas 24x7 não ignoram nenhuma).
pub fn estimate_active_minutes(
    observations: &[StatusObservation],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    scheduled_minutes: f64,
    schedule: &Schedule,
) -> f64 {
    if scheduled_minutes <= 0.0 {
        return 0.0;
    }

    let active_minutes = match observations {
        [] => 0.0,
        [only] => {
            if only.status.is_active() {
                scheduled_minutes
            } else {
                0.0
            }
        }
        _ => interpolate(observations, window_start, window_end, scheduled_minutes, schedule),
    };

    active_minutes.clamp(0.0, scheduled_minutes)
}

fn interpolate(
    observations: &[StatusObservation],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    scheduled_minutes: f64,
    schedule: &Schedule,
) -> f64 {
    let last_index = observations.len() - 1;
    let mut active_minutes = 0.0;
    let mut previous: Option<&StatusObservation> = None;

    for (index, observation) in observations.iter().enumerate() {
        // Fora do horário a observação é invisível: não abre segmento,
        // não vira "anterior" e não extrapola até o fim da janela.
        if !schedule.is_open_at(observation.instant) {
            continue;
        }

        match previous {
            None => {
                // Só extrapola para trás a partir da primeira observação da janela.
                if index == 0 && observation.status.is_active() {
                    let elapsed = minutes_between(window_start, observation.instant);
                    active_minutes += elapsed.min(scheduled_minutes);
                }
            }
            Some(prev) => {
                if prev.status.is_active() {
                    active_minutes += minutes_between(prev.instant, observation.instant);
                }
            }
        }

        if index == last_index && observation.status.is_active() {
            let elapsed = minutes_between(observation.instant, window_end);
            active_minutes += elapsed.min(scheduled_minutes - active_minutes);
        }

        previous = Some(observation);
    }

    active_minutes
}

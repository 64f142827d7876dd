//! aggregator.rs — Cálculo da linha de relatório de uma loja
//!
//! Para cada janela (última hora, dia e semana) busca as observações, calcula
//! os minutos de funcionamento e estima o tempo ativo.

use crate::error::MonitorError;
use crate::interpolation::estimate_active_minutes;
use crate::repository::{ObservationRepository, ScheduleRepository, TimezoneRepository};
use crate::schedule::{OverlapPolicy, Schedule};
use crate::types::{ReportRow, StatusObservation};
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use tracing::debug;

/// Parâmetros do cálculo compartilhados por todas as lojas de uma execução.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub default_timezone: Tz,
    pub overlap_policy: OverlapPolicy,
}

/// Janelas móveis ancoradas no instante de referência.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    LastHour,
    LastDay,
    LastWeek,
}

impl Window {
    pub fn length(self) -> TimeDelta {
        match self {
            Window::LastHour => TimeDelta::hours(1),
            Window::LastDay => TimeDelta::days(1),
            Window::LastWeek => TimeDelta::days(7),
        }
    }

    /// Limites `[reference - length, reference]` da janela.
    pub fn bounds(self, reference: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (reference - self.length(), reference)
    }

    /// Última hora em minutos; dia e semana em horas.
    pub fn to_report_unit(self, minutes: f64) -> f64 {
        match self {
            Window::LastHour => minutes,
            Window::LastDay | Window::LastWeek => minutes / 60.0,
        }
    }
}

/// Resultado de uma janela, em minutos.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowEstimate {
    pub scheduled_minutes: f64,
    pub active_minutes: f64,
}

impl WindowEstimate {
    pub fn downtime_minutes(&self) -> f64 {
        self.scheduled_minutes - self.active_minutes
    }
}

/// Calcula uma janela a partir das observações já selecionadas e ordenadas.
pub fn estimate_window(
    observations: &[StatusObservation],
    window: Window,
    reference: DateTime<Utc>,
    schedule: &Schedule,
) -> WindowEstimate {
    let (start, end) = window.bounds(reference);
    let scheduled_minutes = schedule.scheduled_minutes(start, end);
    let active_minutes =
        estimate_active_minutes(observations, start, end, scheduled_minutes, schedule);
    WindowEstimate {
        scheduled_minutes,
        active_minutes,
    }
}

/// Observações da loja dentro da janela, em ordem crescente de instante.
pub async fn select_observations<S>(
    store: &S,
    site_id: &str,
    window: Window,
    reference: DateTime<Utc>,
) -> Result<Vec<StatusObservation>, MonitorError>
where
    S: ObservationRepository + ?Sized,
{
    let (start, end) = window.bounds(reference);
    let mut observations = store.query(site_id, start, end).await?;
    observations.sort_by_key(|o| o.instant);
    Ok(observations)
}

/// Carrega regras e fuso da loja; sem fuso cadastrado usa o padrão.
pub async fn load_schedule<S>(
    store: &S,
    site_id: &str,
    settings: &EngineSettings,
) -> Result<Schedule, MonitorError>
where
    S: ScheduleRepository + TimezoneRepository + ?Sized,
{
    let tz = match store.zone_for(site_id).await? {
        Some(zone) => zone
            .trim()
            .parse::<Tz>()
            .map_err(|_| MonitorError::InvalidTimezone(format!("loja {site_id}: {zone:?}")))?,
        None => settings.default_timezone,
    };
    let rules = store.rules_for(site_id).await?;
    Schedule::new(rules, tz, settings.overlap_policy)
}

/// Monta a linha de relatório de uma loja para o instante de referência.
pub async fn compute_site_row<S>(
    store: &S,
    site_id: &str,
    reference: DateTime<Utc>,
    settings: &EngineSettings,
) -> Result<ReportRow, MonitorError>
where
    S: ObservationRepository + ScheduleRepository + TimezoneRepository + ?Sized,
{
    let schedule = load_schedule(store, site_id, settings).await?;

    let mut estimates = [WindowEstimate {
        scheduled_minutes: 0.0,
        active_minutes: 0.0,
    }; 3];
    for (slot, window) in estimates
        .iter_mut()
        .zip([Window::LastHour, Window::LastDay, Window::LastWeek])
    {
        let observations = select_observations(store, site_id, window, reference).await?;
        *slot = estimate_window(&observations, window, reference, &schedule);
        debug!(
            "[LOJA {}] {:?}: {} observações, {:.2} min programados, {:.2} min ativos",
            site_id,
            window,
            observations.len(),
            slot.scheduled_minutes,
            slot.active_minutes
        );
    }
    let [hour, day, week] = estimates;

    Ok(ReportRow {
        site_id: site_id.to_string(),
        uptime_last_hour: round2(Window::LastHour.to_report_unit(hour.active_minutes)),
        uptime_last_day: round2(Window::LastDay.to_report_unit(day.active_minutes)),
        uptime_last_week: round2(Window::LastWeek.to_report_unit(week.active_minutes)),
        downtime_last_hour: round2(Window::LastHour.to_report_unit(hour.downtime_minutes())),
        downtime_last_day: round2(Window::LastDay.to_report_unit(day.downtime_minutes())),
        downtime_last_week: round2(Window::LastWeek.to_report_unit(week.downtime_minutes())),
    })
}

/// Arredonda para duas casas decimais (meio para longe do zero).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

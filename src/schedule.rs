//! schedule.rs — Horário de funcionamento semanal de uma loja
//!
//! Resolve, para qualquer intervalo UTC, quantos minutos caem dentro do
//! horário de funcionamento local, considerando fuso horário, horário de verão
//! e regras que atravessam a meia-noite.

use crate::error::MonitorError;
use crate::types::OperatingHoursRule;
use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

/// Como somar janelas de regras que se sobrepõem no mesmo intervalo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Cada regra contribui independentemente (sobreposições contam em dobro).
    #[default]
    Additive,
    /// Janelas sobrepostas são unidas antes da soma.
    Merge,
}

/// Horário de funcionamento de uma loja já associado ao seu fuso.
#[derive(Debug, Clone)]
pub struct Schedule {
    rules: Vec<OperatingHoursRule>,
    tz: Tz,
    policy: OverlapPolicy,
}

impl Schedule {
    /// Cria o horário validando os dias da semana das regras.
    ///
    /// Uma lista vazia de regras significa loja aberta 24x7.
    pub fn new(
        rules: Vec<OperatingHoursRule>,
        tz: Tz,
        policy: OverlapPolicy,
    ) -> Result<Self, MonitorError> {
        if let Some(rule) = rules.iter().find(|r| r.weekday > 6) {
            return Err(MonitorError::InvalidRule(format!(
                "loja {} com dia da semana {} fora de 0..=6",
                rule.site_id, rule.weekday
            )));
        }
        Ok(Self { rules, tz, policy })
    }

    #[cfg(test)]
    pub fn always_open(tz: Tz) -> Self {
        Self {
            rules: Vec::new(),
            tz,
            policy: OverlapPolicy::default(),
        }
    }

    pub fn is_always_open(&self) -> bool {
        self.rules.is_empty()
    }

    /// Minutos do intervalo `[start, end]` que caem dentro do horário de funcionamento.
    ///
    /// Percorre o calendário local dia a dia, da data local de `start` até a de
    /// `end`, intersectando cada regra do dia com o intervalo.
    pub fn scheduled_minutes(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        if end <= start {
            return 0.0;
        }
        if self.is_always_open() {
            return minutes_between(start, end);
        }

        let first_day = start.with_timezone(&self.tz).date_naive();
        let last_day = end.with_timezone(&self.tz).date_naive();

        let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        let mut day = first_day;
        while day <= last_day {
            for rule in self.rules_on(day) {
                let (open, close) = self.rule_window(rule, day);
                let from = open.max(start);
                let to = close.min(end);
                if from < to {
                    spans.push((from, to));
                }
            }
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        let total = match self.policy {
            OverlapPolicy::Additive => sum_spans(&spans),
            OverlapPolicy::Merge => sum_spans(&merge_spans(spans)),
        };
        delta_minutes(total)
    }

    /// Indica se o instante cai dentro de alguma regra da sua data local.
    ///
    /// Os limites da janela são inclusivos.
    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        if self.is_always_open() {
            return true;
        }
        let day = instant.with_timezone(&self.tz).date_naive();
        self.rules_on(day).any(|rule| {
            let (open, close) = self.rule_window(rule, day);
            open <= instant && instant <= close
        })
    }

    fn rules_on(&self, day: NaiveDate) -> impl Iterator<Item = &OperatingHoursRule> {
        let weekday = day.weekday().num_days_from_monday() as u8;
        self.rules.iter().filter(move |rule| rule.weekday == weekday)
    }

    fn rule_window(&self, rule: &OperatingHoursRule, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let (open, close) = rule.window_on(day);
        (resolve_local(self.tz, open), resolve_local(self.tz, close))
    }
}

/// Minutos (fracionários) entre dois instantes; negativo se `to < from`.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    delta_minutes(to - from)
}

fn delta_minutes(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 / 60.0 + f64::from(delta.subsec_nanos()) / 60e9
}

/// Converte um horário local em instante UTC.
///
/// Horários ambíguos (fim do horário de verão) usam a primeira ocorrência;
/// horários inexistentes (início do horário de verão) usam o offset anterior ao salto.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let offset = tz.offset_from_utc_datetime(&(naive - TimeDelta::days(1))).fix();
            let utc = naive - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
            Utc.from_utc_datetime(&utc)
        }
    }
}

fn sum_spans(spans: &[(DateTime<Utc>, DateTime<Utc>)]) -> TimeDelta {
    spans
        .iter()
        .fold(TimeDelta::zero(), |acc, (from, to)| acc + (*to - *from))
}

fn merge_spans(mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    spans.sort_by_key(|(from, _)| *from);
    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(spans.len());
    for (from, to) in spans {
        match merged.last_mut() {
            Some((_, last_to)) if from <= *last_to => {
                if to > *last_to {
                    *last_to = to;
                }
            }
            _ => merged.push((from, to)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    const EPSILON: f64 = 1e-9;

    fn rule(weekday: u8, start: (u32, u32), end: (u32, u32)) -> OperatingHoursRule {
        OperatingHoursRule {
            site_id: "loja".into(),
            weekday,
            local_start: NaiveTime::from_hms_opt(start.0, start.1, 0).expect("hora válida"),
            local_end: NaiveTime::from_hms_opt(end.0, end.1, 0).expect("hora válida"),
            closes_at_day_end: false,
        }
    }

    /// Regra `00:00-24:00` para o dia da semana.
    fn full_day(weekday: u8) -> OperatingHoursRule {
        OperatingHoursRule {
            closes_at_day_end: true,
            ..rule(weekday, (0, 0), (0, 0))
        }
    }

    fn local(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        tz.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .earliest()
            .expect("instante local válido")
            .with_timezone(&Utc)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "esperado {expected}, obtido {actual}"
        );
    }

    #[test]
    fn no_rules_means_whole_interval() {
        let schedule = Schedule::always_open(Tz::UTC);
        let start = local(Tz::UTC, 2023, 1, 20, 10, 0);
        let end = start + TimeDelta::hours(24);

        assert!(schedule.is_always_open());
        assert_close(schedule.scheduled_minutes(start, end), 1440.0);
    }

    #[test]
    fn midnight_spanning_rule_counts_both_dates() -> Result<(), MonitorError> {
        // 2023-01-20 é uma sexta-feira (weekday 4)
        let schedule = Schedule::new(vec![rule(4, (22, 0), (2, 0))], Tz::UTC, OverlapPolicy::Additive)?;
        let start = local(Tz::UTC, 2023, 1, 20, 21, 0);
        let end = local(Tz::UTC, 2023, 1, 21, 3, 0);

        assert_close(schedule.scheduled_minutes(start, end), 240.0);
        Ok(())
    }

    #[test]
    fn interval_outside_rules_is_zero() -> Result<(), MonitorError> {
        let schedule = Schedule::new(vec![rule(0, (9, 0), (17, 0))], Tz::UTC, OverlapPolicy::Additive)?;
        // sábado inteiro
        let start = local(Tz::UTC, 2023, 1, 21, 0, 0);
        let end = local(Tz::UTC, 2023, 1, 21, 23, 0);

        assert_close(schedule.scheduled_minutes(start, end), 0.0);
        Ok(())
    }

    #[test]
    fn local_timezone_shifts_business_hours() -> Result<(), MonitorError> {
        let tz: Tz = "America/Chicago".parse().map_err(|_| MonitorError::InvalidTimezone("America/Chicago".into()))?;
        // segunda-feira 09:00-17:00 em Chicago = 15:00-23:00 UTC no inverno
        let schedule = Schedule::new(vec![rule(0, (9, 0), (17, 0))], tz, OverlapPolicy::Additive)?;
        let start = local(Tz::UTC, 2023, 1, 23, 14, 0);
        let end = local(Tz::UTC, 2023, 1, 23, 16, 30);

        assert_close(schedule.scheduled_minutes(start, end), 90.0);
        assert!(!schedule.is_open_at(local(Tz::UTC, 2023, 1, 23, 14, 59)));
        assert!(schedule.is_open_at(local(Tz::UTC, 2023, 1, 23, 15, 0)));
        Ok(())
    }

    #[test]
    fn full_day_rules_match_always_open_across_dst() -> Result<(), MonitorError> {
        let tz: Tz = "America/Chicago".parse().map_err(|_| MonitorError::InvalidTimezone("America/Chicago".into()))?;
        let full_days = Schedule::new((0..7).map(full_day).collect(), tz, OverlapPolicy::Additive)?;
        let always = Schedule::always_open(tz);

        // 2023-03-12: início do horário de verão em Chicago
        let start = local(tz, 2023, 3, 11, 12, 0);
        let end = local(tz, 2023, 3, 13, 12, 0);

        let expected = always.scheduled_minutes(start, end);
        assert_close(expected, 47.0 * 60.0);
        assert_close(full_days.scheduled_minutes(start, end), expected);
        Ok(())
    }

    #[test]
    fn overlapping_rules_add_or_merge_by_policy() -> Result<(), MonitorError> {
        let rules = vec![rule(0, (9, 0), (12, 0)), rule(0, (11, 0), (14, 0))];
        let additive = Schedule::new(rules.clone(), Tz::UTC, OverlapPolicy::Additive)?;
        let merged = Schedule::new(rules, Tz::UTC, OverlapPolicy::Merge)?;
        let start = local(Tz::UTC, 2023, 1, 23, 0, 0);
        let end = local(Tz::UTC, 2023, 1, 23, 23, 0);

        assert_close(additive.scheduled_minutes(start, end), 360.0);
        assert_close(merged.scheduled_minutes(start, end), 300.0);
        Ok(())
    }

    #[test]
    fn rejects_weekday_out_of_range() {
        let result = Schedule::new(vec![rule(7, (9, 0), (17, 0))], Tz::UTC, OverlapPolicy::Additive);
        assert!(matches!(result, Err(MonitorError::InvalidRule(_))));
    }

    #[test]
    fn membership_is_inclusive_at_both_ends() -> Result<(), MonitorError> {
        let schedule = Schedule::new(vec![rule(0, (9, 0), (17, 0))], Tz::UTC, OverlapPolicy::Additive)?;
        assert!(schedule.is_open_at(local(Tz::UTC, 2023, 1, 23, 9, 0)));
        assert!(schedule.is_open_at(local(Tz::UTC, 2023, 1, 23, 17, 0)));
        assert!(!schedule.is_open_at(local(Tz::UTC, 2023, 1, 23, 17, 1)));
        Ok(())
    }

    #[test]
    fn nonexistent_local_time_resolves_after_gap() {
        let tz: Tz = chrono_tz::America::Chicago;
        let naive = NaiveDate::from_ymd_opt(2023, 3, 12)
            .and_then(|d| d.and_hms_opt(2, 30, 0))
            .expect("data válida");
        // 02:30 não existe; com offset -06:00 vira 08:30 UTC (03:30 CDT)
        let resolved = resolve_local(tz, naive);
        assert_eq!(resolved, local(Tz::UTC, 2023, 3, 12, 8, 30));
    }

    #[test]
    fn ambiguous_local_time_takes_earliest_instant() {
        let tz: Tz = chrono_tz::America::Chicago;
        let naive = NaiveDate::from_ymd_opt(2023, 11, 5)
            .and_then(|d| d.and_hms_opt(1, 30, 0))
            .expect("data válida");
        // 01:30 ocorre duas vezes; a primeira ainda é CDT (-05:00)
        assert_eq!(resolve_local(tz, naive), local(Tz::UTC, 2023, 11, 5, 6, 30));
    }

    #[test]
    fn full_day_rules_match_always_open_across_fall_back_week() -> Result<(), MonitorError> {
        let tz: Tz = chrono_tz::America::Chicago;
        let full_days = Schedule::new((0..7).map(full_day).collect(), tz, OverlapPolicy::Additive)?;
        let always = Schedule::always_open(tz);

        // 2023-11-05: fim do horário de verão em Chicago (dia local de 25h)
        let start = local(tz, 2023, 11, 4, 12, 0);
        let end = start + TimeDelta::days(7);

        assert_close(always.scheduled_minutes(start, end), 10080.0);
        assert_close(full_days.scheduled_minutes(start, end), 10080.0);
        Ok(())
    }

    #[test]
    fn fall_back_day_is_twenty_five_hours() -> Result<(), MonitorError> {
        let tz: Tz = chrono_tz::America::Chicago;
        let schedule = Schedule::new(vec![full_day(6)], tz, OverlapPolicy::Additive)?;
        let start = local(tz, 2023, 11, 5, 0, 0);
        let end = local(tz, 2023, 11, 6, 0, 0);

        assert_close(schedule.scheduled_minutes(start, end), 25.0 * 60.0);
        Ok(())
    }

    #[test]
    fn equal_start_and_end_schedules_nothing() -> Result<(), MonitorError> {
        let schedule = Schedule::new(vec![rule(0, (9, 0), (9, 0))], Tz::UTC, OverlapPolicy::Additive)?;
        let start = local(Tz::UTC, 2023, 1, 23, 0, 0);
        let end = local(Tz::UTC, 2023, 1, 24, 0, 0);

        assert_close(schedule.scheduled_minutes(start, end), 0.0);
        Ok(())
    }
}

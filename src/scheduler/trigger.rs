use std::fmt;
use std::time::Duration;

/// Named cron fields rendered to a six-field expression (seconds first), evaluated in UTC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    second: String,
    minute: String,
    hour: String,
    day_of_month: String,
    month: String,
    day_of_week: String,
}

impl Default for CronFields {
    fn default() -> Self {
        Self {
            second: "0".to_string(),
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_month: "*".to_string(),
            month: "*".to_string(),
            day_of_week: "*".to_string(),
        }
    }
}

impl CronFields {
    /// Every minute, on second 0
    pub fn new() -> Self {
        Self::default()
    }

    pub fn second(mut self, value: impl Into<String>) -> Self {
        self.second = value.into();
        self
    }

    pub fn minute(mut self, value: impl Into<String>) -> Self {
        self.minute = value.into();
        self
    }

    pub fn hour(mut self, value: impl Into<String>) -> Self {
        self.hour = value.into();
        self
    }

    pub fn day_of_month(mut self, value: impl Into<String>) -> Self {
        self.day_of_month = value.into();
        self
    }

    pub fn month(mut self, value: impl Into<String>) -> Self {
        self.month = value.into();
        self
    }

    /// Day names or ranges, e.g. `Mon-Fri`
    pub fn day_of_week(mut self, value: impl Into<String>) -> Self {
        self.day_of_week = value.into();
        self
    }

    pub fn expression(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.second, self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

/// When a job fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronFields),
    Interval(Duration),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(fields) => write!(f, "cron '{}' UTC", fields.expression()),
            Trigger::Interval(every) => write!(f, "every {}s", every.as_secs()),
        }
    }
}

/// Registration details for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: &'static str,
    pub triggers: Vec<Trigger>,
    /// Longest a firing may wait for a pool slot before it is discarded
    pub misfire_grace: Duration,
}

impl JobSpec {
    pub fn new(id: &'static str, misfire_grace: Duration) -> Self {
        Self {
            id,
            triggers: Vec::new(),
            misfire_grace,
        }
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_expression() {
        let fields = CronFields::new().minute("30").hour("12").day_of_week("Tue-Sat");
        assert_eq!(fields.expression(), "0 30 12 * * Tue-Sat");

        let fields = CronFields::new().minute("2,17,32,47").hour("4-9").day_of_week("Mon-Fri");
        assert_eq!(fields.expression(), "0 2,17,32,47 4-9 * * Mon-Fri");
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(
            Trigger::Cron(CronFields::new().minute("47").hour("3")).to_string(),
            "cron '0 47 3 * * *' UTC"
        );
        assert_eq!(Trigger::Interval(Duration::from_secs(90)).to_string(), "every 90s");
    }

    #[test]
    fn test_job_spec_builder() {
        let spec = JobSpec::new("load_intraday_15m_candles", Duration::from_secs(120))
            .trigger(Trigger::Cron(CronFields::new().minute("2").hour("10")))
            .trigger(Trigger::Interval(Duration::from_secs(60)));

        assert_eq!(spec.triggers.len(), 2);
        assert_eq!(spec.misfire_grace, Duration::from_secs(120));
    }
}

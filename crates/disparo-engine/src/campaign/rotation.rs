//! Instance rotation strategies
//!
//! Pure selection logic over the eligible instance list. The pick is
//! advisory: nothing is reserved here, the send worker's gateway call
//! and `record_send` settle the actual volume accounting.

use disparo_storage::models::{Campaign, Instance, RotationMode};
use disparo_storage::repository::InstanceFleetCounts;

/// Why the eligible list came back empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoInstanceReason {
    /// The tenant has no instances at all
    NoneAttached,
    /// Instances exist but none has an open gateway session
    AllDisconnected,
    /// Connected instances exist but all are below the health floor
    AllUnhealthy,
    /// Connected, healthy instances exist but all hit the daily limit
    AllRateLimited,
}

impl NoInstanceReason {
    /// The auto-pause reason the dispatcher records for this condition.
    /// Rate limiting is not a pause: the dispatcher waits for the daily
    /// reset instead.
    pub fn pause_reason(&self) -> Option<&'static str> {
        match self {
            NoInstanceReason::NoneAttached => Some("no-instances-attached"),
            NoInstanceReason::AllDisconnected => Some("all-instances-disconnected"),
            NoInstanceReason::AllUnhealthy => Some("all-instances-unhealthy"),
            NoInstanceReason::AllRateLimited => None,
        }
    }
}

impl std::fmt::Display for NoInstanceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoInstanceReason::NoneAttached => write!(f, "no instances attached"),
            NoInstanceReason::AllDisconnected => write!(f, "all instances disconnected"),
            NoInstanceReason::AllUnhealthy => write!(f, "all instances unhealthy"),
            NoInstanceReason::AllRateLimited => write!(f, "all instances at daily limit"),
        }
    }
}

/// Outcome of a selection: the instance to send through and, for round
/// robin, the cursor value to persist before the next pick.
#[derive(Debug)]
pub struct Selection<'a> {
    pub instance: &'a Instance,
    pub next_cursor: Option<i32>,
}

/// Pick an instance for the campaign's next send. Returns `None` when
/// the eligible list is empty; use [`unavailable_reason`] with fresh
/// fleet counts to find out why.
pub fn select<'a>(campaign: &Campaign, eligible: &'a [Instance]) -> Option<Selection<'a>> {
    let mode = campaign
        .rotation_mode_enum()
        .unwrap_or(RotationMode::RoundRobin);

    match mode {
        RotationMode::RoundRobin => {
            let len = eligible.len();
            if len == 0 {
                return None;
            }
            // The stored cursor stays within [0, len), but the list can
            // shrink between picks; fold it back in range.
            let idx = campaign.rotation_cursor.rem_euclid(len as i32) as usize;
            Some(Selection {
                instance: &eligible[idx],
                next_cursor: Some(((idx + 1) % len) as i32),
            })
        }
        RotationMode::Balanced => {
            // First minimum wins on ties, so the stable eligible order
            // decides between equally loaded instances.
            let instance = eligible.iter().min_by_key(|i| i.msgs_sent_today)?;
            Some(Selection {
                instance,
                next_cursor: None,
            })
        }
        RotationMode::Intelligent => {
            let mut best: Option<(&Instance, f64)> = None;
            for instance in eligible {
                let w = intelligent_weight(instance, campaign.daily_limit_per_instance);
                match best {
                    Some((_, best_w)) if w <= best_w => {}
                    _ => best = Some((instance, w)),
                }
            }
            best.map(|(instance, _)| Selection {
                instance,
                next_cursor: None,
            })
        }
    }
}

/// Health-weighted score with remaining daily headroom mixed in. With
/// no daily limit the headroom term contributes nothing and health
/// alone decides.
fn intelligent_weight(instance: &Instance, daily_limit: i32) -> f64 {
    let health = instance.health_score as f64 / 100.0;
    let availability = if daily_limit > 0 {
        1.0 - instance.msgs_sent_today as f64 / daily_limit as f64
    } else {
        0.0
    };
    0.7 * health + 0.3 * availability
}

/// Explain an empty eligible list. Checked in order of severity: an
/// empty fleet outranks a disconnected one, which outranks an unhealthy
/// one; anything left standing is at its daily cap.
pub fn unavailable_reason(fleet: &InstanceFleetCounts) -> NoInstanceReason {
    if fleet.total == 0 {
        NoInstanceReason::NoneAttached
    } else if fleet.connected == 0 {
        NoInstanceReason::AllDisconnected
    } else if fleet.healthy == 0 {
        NoInstanceReason::AllUnhealthy
    } else {
        NoInstanceReason::AllRateLimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use disparo_common::types::ScheduleSpec;
    use pretty_assertions::assert_eq;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn instance(name: &str, msgs_sent_today: i32, health_score: i32) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: name.to_string(),
            gateway_name: name.to_string(),
            base_url: "http://gateway.local".to_string(),
            api_key: "key".to_string(),
            connection_state: "open".to_string(),
            health_score,
            msgs_sent_today,
            last_reset_date: None,
            timezone: "UTC".to_string(),
            default_department: None,
            last_check_error: None,
            consecutive_check_failures: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn campaign(mode: RotationMode, cursor: i32, daily_limit: i32) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "test".to_string(),
            description: None,
            status: "running".to_string(),
            rotation_mode: mode.to_string(),
            rotation_cursor: cursor,
            interval_min_s: 30,
            interval_max_s: 60,
            daily_limit_per_instance: daily_limit,
            pause_on_health_below: 30,
            schedule: Json(ScheduleSpec::always_open("UTC")),
            total_contacts: 0,
            messages_sent: 0,
            messages_delivered: 0,
            messages_read: 0,
            messages_failed: 0,
            next_scheduled_send_at: None,
            last_send_at: None,
            last_heartbeat_at: None,
            is_paused: false,
            auto_pause_reason: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_robin_walks_the_list_and_wraps() {
        let fleet = vec![instance("a", 0, 100), instance("b", 0, 100), instance("c", 0, 100)];

        let pick = select(&campaign(RotationMode::RoundRobin, 0, 0), &fleet).unwrap();
        assert_eq!(pick.instance.name, "a");
        assert_eq!(pick.next_cursor, Some(1));

        let pick = select(&campaign(RotationMode::RoundRobin, 2, 0), &fleet).unwrap();
        assert_eq!(pick.instance.name, "c");
        assert_eq!(pick.next_cursor, Some(0));
    }

    #[test]
    fn test_round_robin_cursor_survives_a_shrunken_list() {
        // Cursor was persisted against a larger fleet
        let fleet = vec![instance("a", 0, 100), instance("b", 0, 100)];

        let pick = select(&campaign(RotationMode::RoundRobin, 5, 0), &fleet).unwrap();
        assert_eq!(pick.instance.name, "b");
        assert_eq!(pick.next_cursor, Some(0));
    }

    #[test]
    fn test_balanced_picks_least_sent_first_on_ties() {
        let fleet = vec![instance("a", 5, 100), instance("b", 2, 100), instance("c", 2, 100)];

        let pick = select(&campaign(RotationMode::Balanced, 0, 0), &fleet).unwrap();
        assert_eq!(pick.instance.name, "b");
        assert_eq!(pick.next_cursor, None);
    }

    #[test]
    fn test_intelligent_trades_health_for_headroom() {
        // a: 0.7 * 0.90 + 0.3 * 0.50 = 0.78
        // b: 0.7 * 0.80 + 0.3 * 1.00 = 0.86
        let fleet = vec![instance("a", 50, 90), instance("b", 0, 80)];

        let pick = select(&campaign(RotationMode::Intelligent, 0, 100), &fleet).unwrap();
        assert_eq!(pick.instance.name, "b");
    }

    #[test]
    fn test_intelligent_without_limit_health_decides() {
        // daily_limit 0 zeroes the availability term
        let fleet = vec![instance("a", 999, 90), instance("b", 0, 95)];

        let pick = select(&campaign(RotationMode::Intelligent, 0, 0), &fleet).unwrap();
        assert_eq!(pick.instance.name, "b");
    }

    #[test]
    fn test_intelligent_tie_keeps_first() {
        let fleet = vec![instance("a", 10, 80), instance("b", 10, 80)];

        let pick = select(&campaign(RotationMode::Intelligent, 0, 100), &fleet).unwrap();
        assert_eq!(pick.instance.name, "a");
    }

    #[test]
    fn test_select_on_empty_list() {
        assert!(select(&campaign(RotationMode::RoundRobin, 0, 0), &[]).is_none());
        assert!(select(&campaign(RotationMode::Balanced, 0, 0), &[]).is_none());
        assert!(select(&campaign(RotationMode::Intelligent, 0, 0), &[]).is_none());
    }

    #[test]
    fn test_unavailable_reason_precedence() {
        let fleet = InstanceFleetCounts {
            total: 0,
            connected: 0,
            healthy: 0,
        };
        assert_eq!(unavailable_reason(&fleet), NoInstanceReason::NoneAttached);

        let fleet = InstanceFleetCounts {
            total: 3,
            connected: 0,
            healthy: 0,
        };
        assert_eq!(unavailable_reason(&fleet), NoInstanceReason::AllDisconnected);

        let fleet = InstanceFleetCounts {
            total: 3,
            connected: 2,
            healthy: 0,
        };
        assert_eq!(unavailable_reason(&fleet), NoInstanceReason::AllUnhealthy);

        let fleet = InstanceFleetCounts {
            total: 3,
            connected: 2,
            healthy: 2,
        };
        assert_eq!(unavailable_reason(&fleet), NoInstanceReason::AllRateLimited);
    }

    #[test]
    fn test_pause_reason_mapping() {
        assert_eq!(
            NoInstanceReason::NoneAttached.pause_reason(),
            Some("no-instances-attached")
        );
        assert_eq!(
            NoInstanceReason::AllDisconnected.pause_reason(),
            Some("all-instances-disconnected")
        );
        assert_eq!(
            NoInstanceReason::AllUnhealthy.pause_reason(),
            Some("all-instances-unhealthy")
        );
        assert_eq!(NoInstanceReason::AllRateLimited.pause_reason(), None);
    }
}

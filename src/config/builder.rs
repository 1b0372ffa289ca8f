//! Minimal configuration for a brand-new group.

use super::controller::EXTERNAL_CONTROLLER;
use super::user::{UserChannelConfig, UserConfiguration, UserControllerConfig};
use crate::defs::ElementType;
use crate::element::ElementHandle;
use crate::error::{AppResult, MeasurementGroupError};

/// Create the minimal configuration from the ordered member list.
///
/// Members are grouped under the full name of their controller with only their
/// position recorded as `index`. External members are collected under the
/// `__tango__` pseudo-controller, after all pool controllers, keeping their
/// original positions.
///
/// ```text
/// {controllers: {ctrl_name: {channels: {chan_name: {index}}}}}
/// ```
pub fn build_measurement_configuration(members: &[ElementHandle]) -> AppResult<UserConfiguration> {
    let mut user_config = UserConfiguration::default();
    let mut external = Vec::new();

    for (index, element) in members.iter().enumerate() {
        if element.element_type() == ElementType::External {
            external.push((index, element));
            continue;
        }
        let ctrl_name = element.controller_name().ok_or_else(|| {
            MeasurementGroupError::rejected(format!(
                "member {} has no controller",
                element.full_name()
            ))
        })?;
        user_config
            .controllers
            .entry(ctrl_name.to_string())
            .or_insert_with(UserControllerConfig::default)
            .channels
            .insert(
                element.full_name().to_string(),
                UserChannelConfig::with_index(index),
            );
    }

    if !external.is_empty() {
        let ctrl = user_config
            .controllers
            .entry(EXTERNAL_CONTROLLER.to_string())
            .or_insert_with(UserControllerConfig::default);
        for (index, element) in external {
            ctrl.channels.insert(
                element.full_name().to_string(),
                UserChannelConfig::with_index(index),
            );
        }
    }

    Ok(user_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ExternalChannel;
    use crate::registry::PoolElement;
    use std::sync::Arc;

    #[test]
    fn groups_members_by_controller_and_keeps_positions() {
        let members: Vec<ElementHandle> = vec![
            Arc::new(PoolElement::channel(
                2,
                "ct01",
                ElementType::CTExpChannel,
                "ctctrl01",
            )),
            Arc::new(ExternalChannel::new("sys/tg_test/1/ampli", None)),
            Arc::new(PoolElement::channel(
                5,
                "zerod01",
                ElementType::ZeroDExpChannel,
                "zerodctrl01",
            )),
            Arc::new(PoolElement::channel(
                3,
                "ct02",
                ElementType::CTExpChannel,
                "ctctrl01",
            )),
        ];
        let cfg = build_measurement_configuration(&members).unwrap();

        let names: Vec<_> = cfg.controllers.keys().cloned().collect();
        assert_eq!(
            names,
            vec!["pool/ctctrl01", "pool/zerodctrl01", EXTERNAL_CONTROLLER]
        );
        let ct = &cfg.controllers["pool/ctctrl01"].channels;
        assert_eq!(ct["pool/ct01"].index, Some(0));
        assert_eq!(ct["pool/ct02"].index, Some(3));
        assert_eq!(
            cfg.controllers[EXTERNAL_CONTROLLER].channels["sys/tg_test/1/ampli"].index,
            Some(1)
        );
        assert!(cfg.timer.is_none());
        assert_eq!(cfg.channel_count(), 4);
    }

    #[test]
    fn empty_member_list_gives_empty_configuration() {
        let cfg = build_measurement_configuration(&[]).unwrap();
        assert!(cfg.controllers.is_empty());
    }
}

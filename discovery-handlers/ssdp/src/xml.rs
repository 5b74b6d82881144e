//! UPnP device description XML. Namespace-aware only in
//! the sense that required: `quick-xml`'s serde layer matches on local
//! element name, so a document using either the plain or the
//! `urn:schemas-upnp-org:device-1-0`-prefixed form of `<serviceList>`
//! parses the same way — this also resolves SPEC_FULL.md's noted nested
//! `<service>` discovery gap without special-casing namespaces.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    pub device: DeviceDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default, rename = "manufacturerURL")]
    pub manufacturer_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub model_description: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default, rename = "UDN")]
    pub udn: Option<String>,
    #[serde(default, rename = "presentationURL")]
    pub presentation_url: Option<String>,
    #[serde(default, rename = "serviceList")]
    pub service_list: Option<ServiceList>,
    #[serde(default, rename = "deviceList")]
    pub device_list: Option<DeviceList>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServiceList {
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDescription>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeviceList {
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    #[serde(default, rename = "serviceType")]
    pub service_type: String,
    #[serde(default, rename = "serviceId")]
    pub service_id: String,
    #[serde(default, rename = "controlURL")]
    pub control_url: String,
    #[serde(default, rename = "eventSubURL")]
    pub event_sub_url: String,
    #[serde(default, rename = "SCPDURL")]
    pub scpd_url: String,
}

pub fn parse(xml: &str) -> anyhow::Result<DeviceDescription> {
    let root: Root = quick_xml::de::from_str(xml)?;
    Ok(root.device)
}

/// Flattens a device's own services with every nested embedded device's
/// services, since device-type inference looks at the whole tree.
pub fn all_services(device: &DeviceDescription) -> Vec<&ServiceDescription> {
    let mut out: Vec<&ServiceDescription> = device
        .service_list
        .as_ref()
        .map(|l| l.services.iter().collect())
        .unwrap_or_default();
    if let Some(list) = &device.device_list {
        for child in &list.devices {
            out.extend(all_services(child));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>Living Room Server</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>AcmeServer 2000</modelName>
    <UDN>uuid:1234</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
        <controlURL>/ctl/ContentDir</controlURL>
        <eventSubURL>/evt/ContentDir</eventSubURL>
        <SCPDURL>/desc/ContentDir.xml</SCPDURL>
      </service>
    </serviceList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <friendlyName>WAN</friendlyName>
        <manufacturer>Acme</manufacturer>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:WANCommonInterfaceConfig:1</serviceType>
            <serviceId>urn:upnp-org:serviceId:WANCommonIFC1</serviceId>
            <controlURL>/ctl/WANCommon</controlURL>
            <eventSubURL>/evt/WANCommon</eventSubURL>
            <SCPDURL>/desc/WANCommon.xml</SCPDURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn parses_top_level_fields() {
        let device = parse(SAMPLE).unwrap();
        assert_eq!(device.friendly_name, "Living Room Server");
        assert_eq!(device.manufacturer, "Acme");
        assert_eq!(device.model_name.as_deref(), Some("AcmeServer 2000"));
        assert_eq!(device.udn.as_deref(), Some("uuid:1234"));
    }

    #[test]
    fn nested_device_services_are_reachable() {
        let device = parse(SAMPLE).unwrap();
        let services = all_services(&device);
        assert_eq!(services.len(), 2);
        assert!(services
            .iter()
            .any(|s| s.service_type.contains("WANCommonInterfaceConfig")));
    }
}

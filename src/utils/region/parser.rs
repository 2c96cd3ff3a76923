use std::str::{self, FromStr};
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use crate::errors::ToolkitError::RegionMetadataError;
use crate::errors::ToolkitResult;
use crate::utils::region::{Partition, Region, Service};

#[derive(Default)]
struct RegionDraft {
    display_name: Option<String>,
    system_name: Option<String>,
    flag_icon: Option<String>,
    restrictions: Option<String>,
    services: Vec<Service>,
}

impl RegionDraft {
    fn build(self) -> ToolkitResult<Region> {
        let id = self.system_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RegionMetadataError("Region element without systemname".to_string()))?;
        let display_name = self.display_name.unwrap_or_else(|| id.clone());
        let partition = self.restrictions.and_then(|r| Partition::from_str(&r).ok());

        let mut region = Region::new(&id, &display_name, self.flag_icon.as_deref(), partition);
        for service in self.services {
            // Same abbreviation twice: the later definition wins.
            region.put_service(service);
        }
        Ok(region)
    }
}

#[derive(Default)]
struct ServiceDraft {
    name: Option<String>,
    service_id: Option<String>,
    signer: Option<String>,
    endpoint: String,
}

enum TextTarget {
    DisplayName,
    SystemName,
    FlagIcon,
    Restrictions,
    ServiceEndpoint,
}

/// Parse a region metadata document into regions, in document order.
///
/// The document holds `<region>` elements, each with `<displayname>`, `<systemname>`,
/// `<flag-icon>`, `<restrictions>` and `<service name=".." serviceId=".." signer="..">url</service>`
/// children. Tag names are matched case-insensitively and anything unknown is skipped.
///
/// # Errors
/// [RegionMetadataError] on malformed XML, on a region without `systemname`, on a service
/// without `name` and when the document doesn't define any region.
pub fn parse_region_metadata(xml: &str) -> ToolkitResult<Vec<Region>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut regions = Vec::new();
    let mut region: Option<RegionDraft> = None;
    let mut service: Option<ServiceDraft> = None;
    let mut text_target: Option<TextTarget> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = tag_name(e)?;
                match tag.as_str() {
                    "region" => region = Some(RegionDraft::default()),
                    "displayname" if region.is_some() => text_target = Some(TextTarget::DisplayName),
                    "systemname" if region.is_some() => text_target = Some(TextTarget::SystemName),
                    "flag-icon" if region.is_some() => text_target = Some(TextTarget::FlagIcon),
                    "restrictions" if region.is_some() => text_target = Some(TextTarget::Restrictions),
                    "service" if region.is_some() => {
                        service = Some(parse_service_attributes(e)?);
                        text_target = Some(TextTarget::ServiceEndpoint);
                    }
                    _ => text_target = None,
                }
            }
            Ok(Event::Empty(ref e)) => {
                // `<service name="x"/>` has no endpoint, so it can't be used.
                if tag_name(e)? == "service" {
                    warn!("Skipping service without endpoint in region metadata");
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape()
                    .map_err(|e| RegionMetadataError(format!("Invalid text at position {}: {}", reader.buffer_position(), e)))?
                    .trim()
                    .to_string();
                apply_text(&mut region, &mut service, &text_target, text);
            }
            Ok(Event::CData(ref e)) => {
                let text = String::from_utf8_lossy(e).trim().to_string();
                apply_text(&mut region, &mut service, &text_target, text);
            }
            Ok(Event::End(ref e)) => {
                let tag = str::from_utf8(e.name().as_ref())
                    .map_err(|_| RegionMetadataError("Invalid UTF-8 in tag name".to_string()))?
                    .to_lowercase();
                match tag.as_str() {
                    "service" => {
                        if let (Some(draft), Some(current)) = (service.take(), region.as_mut()) {
                            let name = draft.name
                                .ok_or_else(|| RegionMetadataError("Service element without name".to_string()))?;
                            current.services.push(Service::new(
                                &name,
                                draft.service_id.as_deref(),
                                &draft.endpoint,
                                draft.signer.as_deref(),
                            ));
                        }
                    }
                    "region" => {
                        if let Some(draft) = region.take() {
                            regions.push(draft.build()?);
                        }
                    }
                    _ => {}
                }
                text_target = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RegionMetadataError(format!("XML error at position {}: {}", reader.buffer_position(), e)))
            }
            _ => {}
        }
    }

    if regions.is_empty() {
        return Err(RegionMetadataError("No region is defined in the metadata".to_string()));
    }
    debug!("Parsed {} regions from metadata", regions.len());

    Ok(regions)
}

fn tag_name(e: &BytesStart) -> ToolkitResult<String> {
    let name = e.name();
    let tag = str::from_utf8(name.as_ref())
        .map_err(|_| RegionMetadataError("Invalid UTF-8 in tag name".to_string()))?;
    Ok(tag.to_lowercase())
}

fn parse_service_attributes(e: &BytesStart) -> ToolkitResult<ServiceDraft> {
    let mut draft = ServiceDraft::default();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| RegionMetadataError(e.to_string()))?;
        let key = str::from_utf8(attr.key.as_ref()).unwrap_or("").to_lowercase();
        let value = attr.unescape_value()
            .map_err(|e| RegionMetadataError(e.to_string()))?
            .to_string();

        match key.as_str() {
            "name" => draft.name = Some(value),
            "serviceid" => draft.service_id = Some(value).filter(|v| !v.is_empty()),
            "signer" => draft.signer = Some(value).filter(|v| !v.is_empty()),
            _ => {}
        }
    }
    Ok(draft)
}

fn apply_text(region: &mut Option<RegionDraft>, service: &mut Option<ServiceDraft>, target: &Option<TextTarget>, text: String) {
    let Some(current) = region.as_mut() else {
        return;
    };
    match target {
        Some(TextTarget::DisplayName) => current.display_name = Some(text),
        Some(TextTarget::SystemName) => current.system_name = Some(text),
        Some(TextTarget::FlagIcon) => current.flag_icon = Some(text).filter(|t| !t.is_empty()),
        Some(TextTarget::Restrictions) => current.restrictions = Some(text),
        Some(TextTarget::ServiceEndpoint) => {
            if let Some(draft) = service.as_mut() {
                draft.endpoint.push_str(&text);
            }
        }
        None => {}
    }
}

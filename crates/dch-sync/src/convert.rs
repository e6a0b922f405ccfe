//! Bidirectional mapping between canonical DCAT records and target catalog
//! records.

use dch_core::{
    CatalogRecord, DcatDataset, Distribution, Publisher, PublisherDetails, Resource, Tag,
};
use thiserror::Error;

use crate::LicenseRegistry;

/// Some feeds publish this placeholder instead of omitting the license.
const NO_LICENSE_SENTINEL: &str = "No license provided";

/// Registries commonly list the national-archives licence under a newer
/// URL; the old one still appears in harvested metadata.
const LEGACY_OGL_URL: &str = "http://www.nationalarchives.gov.uk/doc/open-government-licence/";
const LEGACY_OGL_ID: &str = "uk-ogl";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("dataset has neither an identifier nor a URI and cannot be tracked")]
    NoStableKey,
}

/// Map a canonical record onto the target catalog schema. Everything the
/// target has no first-class field for is carried in extension fields.
pub fn dcat_to_catalog(
    dataset: &DcatDataset,
    licenses: &dyn LicenseRegistry,
) -> Result<CatalogRecord, ConvertError> {
    if !dataset.has_stable_key() {
        return Err(ConvertError::NoStableKey);
    }

    let mut record = CatalogRecord {
        title: dataset.title.clone(),
        notes: dataset.description.clone(),
        url: dataset.landing_page.clone().or_else(|| dataset.uri.clone()),
        tags: dataset
            .keyword
            .iter()
            .map(|keyword| Tag {
                name: keyword.clone(),
            })
            .collect(),
        ..CatalogRecord::default()
    };

    // these dates track when the data itself changed, not the metadata
    record.push_extra("data_issued", dataset.issued.clone());
    record.push_extra("data_modified", dataset.modified.clone());

    // the source identifier may be opaque hex rather than a URI, so it is
    // kept apart from the record's own key
    record.push_extra("guid", dataset.identifier.clone());
    record.push_extra("metadata_uri", dataset.uri.clone());

    match &dataset.publisher {
        Some(Publisher::Name(name)) => {
            record.push_extra("dcat_publisher_name", Some(name.clone()));
        }
        Some(Publisher::Details(details)) => {
            if let Some(name) = &details.name {
                record.push_extra("dcat_publisher_name", Some(name.clone()));
            }
            if let Some(uri) = &details.uri {
                record.push_extra("dcat_publisher_uri", Some(uri.clone()));
            }
            // the target may have edited the publisher's address, so the
            // mailbox is only carried as an extra, never synchronized back
            if let Some(mbox) = &details.mbox {
                record.push_extra("dcat_publisher_email", Some(mbox.clone()));
            }
        }
        None => {}
    }

    if let Some(email) = &dataset.contact_email {
        record.push_extra("contact_email", Some(email.clone()));
    }

    if !dataset.subject.is_empty() {
        record.push_extra("dcat_subject", Some(dataset.subject.join(" ")));
    }

    let license = dataset
        .license
        .as_deref()
        .filter(|license| *license != NO_LICENSE_SENTINEL);
    if let Some(license) = license {
        if license.starts_with("http") {
            record.push_extra("license_url", Some(license.to_string()));
            record.license_id = licenses
                .id_for_url(license)
                .or_else(|| legacy_license_alias(license));
        } else {
            record.push_extra("license_name", Some(license.to_string()));
            record.license_id = licenses.id_for_title(license);
        }
    }

    record.push_extra("language", Some(dataset.language.join(",")));

    for dist in &dataset.distribution {
        record.resources.push(Resource {
            name: dist.title.clone(),
            description: dist.description.clone(),
            url: dist.download_url.clone().or_else(|| dist.access_url.clone()),
            format: dist.format.clone(),
            size: dist.byte_size.as_deref().and_then(parse_byte_size),
            resource_type: None,
        });
    }
    if let Some(url) = &dataset.data_dump {
        record.resources.push(aux_resource("Data dump", url, "RDF", "file"));
    }
    if let Some(url) = &dataset.sparql_endpoint {
        record
            .resources
            .push(aux_resource("SPARQL Endpoint", url, "SPARQL", "api"));
    }
    if let Some(url) = &dataset.zipped_shapefile {
        record
            .resources
            .push(aux_resource("Data as shapefile (zipped)", url, "SHP", "file"));
    }

    Ok(record)
}

/// Map a target catalog record back to the canonical shape by walking the
/// known extension fields. Not a full inverse: the download/access URL
/// distinction, subjects and auxiliary resources do not survive the trip.
pub fn catalog_to_dcat(record: &CatalogRecord) -> DcatDataset {
    let mut dataset = DcatDataset {
        title: record.title.clone(),
        description: record.notes.clone(),
        landing_page: record.url.clone(),
        keyword: record.tags.iter().map(|tag| tag.name.clone()).collect(),
        ..DcatDataset::default()
    };

    let mut publisher = PublisherDetails::default();
    for extra in &record.extras {
        let value = extra.value.clone();
        match extra.key.as_str() {
            "data_issued" => dataset.issued = value,
            "data_modified" => dataset.modified = value,
            "language" => {
                dataset.language = match value.as_deref() {
                    None | Some("") => Vec::new(),
                    Some(joined) => joined.split(',').map(str::to_string).collect(),
                }
            }
            "dcat_publisher_name" => publisher.name = value,
            "dcat_publisher_email" => publisher.mbox = value,
            "guid" => dataset.identifier = value,
            "license_url" => dataset.license = value,
            _ => {}
        }
    }

    if publisher.name.is_none() {
        if let Some(maintainer) = &record.maintainer {
            publisher.name = Some(maintainer.clone());
            if let Some(email) = &record.maintainer_email {
                publisher.mbox = Some(email.clone());
            }
        }
    }
    if publisher != PublisherDetails::default() {
        dataset.publisher = Some(Publisher::Details(publisher));
    }

    for resource in &record.resources {
        dataset.distribution.push(Distribution {
            title: resource.name.clone(),
            description: resource.description.clone(),
            format: resource.format.clone(),
            byte_size: resource.size.map(|size| size.to_string()),
            // a resource keeps one URL, which maps back to the access URL;
            // whether it originally was a download URL is not recoverable
            access_url: resource.url.clone(),
            ..Distribution::default()
        });
    }

    dataset
}

/// Unparseable sizes are dropped, never fatal.
pub fn parse_byte_size(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

fn legacy_license_alias(url: &str) -> Option<String> {
    (url == LEGACY_OGL_URL).then(|| LEGACY_OGL_ID.to_string())
}

fn aux_resource(name: &str, url: &str, format: &str, resource_type: &str) -> Resource {
    Resource {
        name: Some(name.to_string()),
        description: None,
        url: Some(url.to_string()),
        format: Some(format.to_string()),
        size: None,
        resource_type: Some(resource_type.to_string()),
    }
}

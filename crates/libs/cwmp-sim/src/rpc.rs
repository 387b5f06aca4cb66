//! ACS-initiated RPCs and their handlers.

use crate::clock::{now_iso8601, ZERO_DATE};
use crate::download::spawn_download;
use crate::error::CodecError;
use crate::net::Connector;
use crate::pending::{PendingOperation, PendingQueue, TransferCompleteReport};
use crate::soap::{fault_element, Envelope, XmlElement};
use crate::store::{ParameterRecord, ParameterStore};
use crate::value::{ParamValue, XSD_STRING};

pub const FAULT_METHOD_NOT_SUPPORTED: &str = "9000";
pub const FAULT_INVALID_ARGUMENTS: &str = "9003";
pub const FAULT_INVALID_PARAMETER_NAME: &str = "9005";

const PARAMETER_KEY: &str = "ManagementServer.ParameterKey";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterAssignment {
    pub name: String,
    pub value: String,
    /// `xsi:type` of the `Value` element, when the ACS sent one.
    pub type_tag: Option<String>,
}

/// Every RPC the simulated device accepts from the ACS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcsRequest {
    GetParameterNames { path: String, next_level: bool },
    GetParameterValues { names: Vec<String> },
    SetParameterValues { assignments: Vec<ParameterAssignment>, parameter_key: Option<String> },
    AddObject { object_name: String, parameter_key: Option<String> },
    DeleteObject { object_name: String, parameter_key: Option<String> },
    Download { command_key: String, url: String },
    Unsupported { method: String },
}

impl AcsRequest {
    pub fn from_element(method: &XmlElement) -> Result<Self, CodecError> {
        let request = match method.local_name() {
            "GetParameterNames" => Self::GetParameterNames {
                path: required_text(method, "ParameterPath")?,
                next_level: parse_bool(&required_text(method, "NextLevel")?),
            },
            "GetParameterValues" => Self::GetParameterValues {
                names: required_child(method, "ParameterNames")?
                    .children
                    .iter()
                    .map(|name| name.text.trim().to_string())
                    .collect(),
            },
            "SetParameterValues" => {
                let mut assignments = Vec::new();
                for item in &required_child(method, "ParameterList")?.children {
                    let value = required_child(item, "Value")?;
                    assignments.push(ParameterAssignment {
                        name: required_text(item, "Name")?,
                        value: value.text.clone(),
                        type_tag: value.attribute("type").map(str::to_string),
                    });
                }
                Self::SetParameterValues {
                    assignments,
                    parameter_key: optional_text(method, "ParameterKey"),
                }
            }
            "AddObject" => Self::AddObject {
                object_name: required_text(method, "ObjectName")?,
                parameter_key: optional_text(method, "ParameterKey"),
            },
            "DeleteObject" => Self::DeleteObject {
                object_name: required_text(method, "ObjectName")?,
                parameter_key: optional_text(method, "ParameterKey"),
            },
            "Download" => Self::Download {
                command_key: optional_text(method, "CommandKey").unwrap_or_default(),
                url: required_text(method, "URL")?,
            },
            other => Self::Unsupported { method: other.to_string() },
        };
        Ok(request)
    }

    pub fn method_name(&self) -> &str {
        match self {
            Self::GetParameterNames { .. } => "GetParameterNames",
            Self::GetParameterValues { .. } => "GetParameterValues",
            Self::SetParameterValues { .. } => "SetParameterValues",
            Self::AddObject { .. } => "AddObject",
            Self::DeleteObject { .. } => "DeleteObject",
            Self::Download { .. } => "Download",
            Self::Unsupported { method } => method,
        }
    }
}

fn required_child<'a>(element: &'a XmlElement, name: &str) -> Result<&'a XmlElement, CodecError> {
    element
        .child(name)
        .ok_or_else(|| CodecError::MissingElement(format!("{}/{}", element.local_name(), name)))
}

fn required_text(element: &XmlElement, name: &str) -> Result<String, CodecError> {
    required_child(element, name).map(|child| child.text.trim().to_string())
}

fn optional_text(element: &XmlElement, name: &str) -> Option<String> {
    element.child_text(name).map(|text| text.trim().to_string())
}

fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "true" | "1")
}

/// Device state a handler may touch.
pub struct MethodContext<'a> {
    pub store: &'a mut ParameterStore,
    pub pending: &'a mut PendingQueue,
    pub connector: &'a Connector,
}

/// Handles one ACS method element, filling `envelope` with the response or a
/// CWMP fault. Never fails: bad input becomes a fault body.
pub fn dispatch(ctx: &mut MethodContext<'_>, method: &XmlElement, envelope: &mut Envelope) {
    match AcsRequest::from_element(method) {
        Ok(request) => handle(ctx, &request, envelope),
        Err(err) => {
            log::warn!("invalid {} request: {}", method.local_name(), err);
            envelope.set_body(fault_element(FAULT_INVALID_ARGUMENTS, "Invalid arguments"));
        }
    }
}

pub fn handle(ctx: &mut MethodContext<'_>, request: &AcsRequest, envelope: &mut Envelope) {
    log::debug!("handling {}", request.method_name());
    let body = match request {
        AcsRequest::GetParameterNames { path, next_level } => {
            get_parameter_names(ctx.store, path, *next_level)
        }
        AcsRequest::GetParameterValues { names } => get_parameter_values(ctx.store, names),
        AcsRequest::SetParameterValues { assignments, parameter_key } => {
            set_parameter_values(ctx.store, assignments, parameter_key.as_deref())
        }
        AcsRequest::AddObject { object_name, parameter_key } => {
            add_object(ctx.store, object_name, parameter_key.as_deref())
        }
        AcsRequest::DeleteObject { object_name, parameter_key } => {
            delete_object(ctx.store, object_name, parameter_key.as_deref())
        }
        AcsRequest::Download { command_key, url } => download(ctx, command_key, url),
        AcsRequest::Unsupported { method } => {
            log::warn!("unsupported method {method}");
            fault_element(FAULT_METHOD_NOT_SUPPORTED, "Method not supported")
        }
    };
    envelope.set_body(body);
}

fn array_of(name: &str, struct_type: &str, items: Vec<XmlElement>) -> XmlElement {
    let array_type = format!("cwmp:{struct_type}[{}]", items.len());
    let mut list = XmlElement::new(name).attr("soap-enc:arrayType", array_type);
    list.children = items;
    list
}

fn get_parameter_names(store: &ParameterStore, path: &str, next_level: bool) -> XmlElement {
    let items = store
        .children_at(path, next_level)
        .into_iter()
        .map(|name| {
            let writable = store.get(name).is_some_and(|record| record.writable);
            XmlElement::new("ParameterInfoStruct")
                .child_element(XmlElement::with_text("Name", name))
                .child_element(XmlElement::with_text("Writable", writable.to_string()))
        })
        .collect();
    XmlElement::new("cwmp:GetParameterNamesResponse")
        .child_element(array_of("ParameterList", "ParameterInfoStruct", items))
}

fn get_parameter_values(store: &ParameterStore, names: &[String]) -> XmlElement {
    let mut items = Vec::new();
    for name in names {
        let resolved: Vec<(&str, &ParamValue)> = if name.is_empty() || name.ends_with('.') {
            store
                .children_at(name, false)
                .into_iter()
                .filter_map(|path| store.value(path).map(|value| (path, value)))
                .collect()
        } else {
            store.value(name).map(|value| (name.as_str(), value)).into_iter().collect()
        };
        if resolved.is_empty() {
            log::debug!("GetParameterValues: unknown name {name}");
            return fault_element(FAULT_INVALID_PARAMETER_NAME, "Invalid parameter name");
        }
        for (path, value) in resolved {
            let value_node =
                XmlElement::with_text("Value", value.to_wire()).attr("xsi:type", value.type_tag());
            items.push(
                XmlElement::new("ParameterValueStruct")
                    .child_element(XmlElement::with_text("Name", path))
                    .child_element(value_node),
            );
        }
    }
    XmlElement::new("cwmp:GetParameterValuesResponse")
        .child_element(array_of("ParameterList", "ParameterValueStruct", items))
}

fn set_parameter_values(
    store: &mut ParameterStore,
    assignments: &[ParameterAssignment],
    parameter_key: Option<&str>,
) -> XmlElement {
    for item in assignments {
        let type_tag = item
            .type_tag
            .clone()
            .or_else(|| store.value(&item.name).map(|value| value.type_tag().to_string()))
            .unwrap_or_else(|| XSD_STRING.to_string());
        let value = ParamValue::from_wire(&type_tag, &item.value);
        if !store.set_value(&item.name, value.clone()) {
            log::debug!("SetParameterValues: creating {}", item.name);
            store.set(item.name.as_str(), ParameterRecord::new(true, value));
        }
    }
    apply_parameter_key(store, parameter_key);
    XmlElement::new("cwmp:SetParameterValuesResponse")
        .child_element(XmlElement::with_text("Status", "0"))
}

fn add_object(
    store: &mut ParameterStore,
    object_name: &str,
    parameter_key: Option<&str>,
) -> XmlElement {
    let instance = store.add_object_instance(object_name);
    log::debug!("AddObject {object_name} -> instance {instance}");
    apply_parameter_key(store, parameter_key);
    XmlElement::new("cwmp:AddObjectResponse")
        .child_element(XmlElement::with_text("InstanceNumber", instance.to_string()))
        .child_element(XmlElement::with_text("Status", "0"))
}

fn delete_object(
    store: &mut ParameterStore,
    object_name: &str,
    parameter_key: Option<&str>,
) -> XmlElement {
    let removed = store.delete_object_instance(object_name);
    log::debug!("DeleteObject {object_name} removed {removed} parameters");
    apply_parameter_key(store, parameter_key);
    XmlElement::new("cwmp:DeleteObjectResponse")
        .child_element(XmlElement::with_text("Status", "0"))
}

fn download(ctx: &mut MethodContext<'_>, command_key: &str, url: &str) -> XmlElement {
    log::info!("Download command_key={command_key} url={url}");
    let outcome = spawn_download(ctx.connector, url);
    ctx.pending.enqueue(PendingOperation::TransferComplete(TransferCompleteReport::new(
        command_key.to_string(),
        now_iso8601(),
        outcome,
    )));
    XmlElement::new("cwmp:DownloadResponse")
        .child_element(XmlElement::with_text("Status", "1"))
        .child_element(XmlElement::with_text("StartTime", ZERO_DATE))
        .child_element(XmlElement::with_text("CompleteTime", ZERO_DATE))
}

fn apply_parameter_key(store: &mut ParameterStore, parameter_key: Option<&str>) {
    let Some(key) = parameter_key else {
        return;
    };
    if let Some(path) = store.resolve_root(PARAMETER_KEY) {
        store.set_value(&path, ParamValue::String(key.to_string()));
    }
}

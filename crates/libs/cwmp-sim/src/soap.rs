//! SOAP envelope encode/decode for CWMP.
//!
//! Outbound envelopes always use the fixed prefixes below. Inbound envelopes are
//! matched on local names only, since ACS implementations pick their own
//! prefixes.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::clock::now_iso8601;
use crate::error::CodecError;
use crate::store::ParameterStore;

pub const NAMESPACES: [(&str, &str); 5] = [
    ("soap-enc", "http://schemas.xmlsoap.org/soap/encoding/"),
    ("soap-env", "http://schemas.xmlsoap.org/soap/envelope/"),
    ("xsd", "http://www.w3.org/2001/XMLSchema"),
    ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
    ("cwmp", "urn:dslforum-org:cwmp-1-0"),
];

pub const EVENT_PERIODIC: &str = "2 PERIODIC";
pub const EVENT_CONNECTION_REQUEST: &str = "6 CONNECTION REQUEST";

/// Informational parameters reported in every Inform when present.
pub const INFORM_PARAMETERS: [&str; 16] = [
    "Device.DeviceInfo.SpecVersion",
    "InternetGatewayDevice.DeviceInfo.SpecVersion",
    "Device.DeviceInfo.HardwareVersion",
    "InternetGatewayDevice.DeviceInfo.HardwareVersion",
    "Device.DeviceInfo.SoftwareVersion",
    "InternetGatewayDevice.DeviceInfo.SoftwareVersion",
    "Device.DeviceInfo.ProvisioningCode",
    "InternetGatewayDevice.DeviceInfo.ProvisioningCode",
    "Device.ManagementServer.ParameterKey",
    "InternetGatewayDevice.ManagementServer.ParameterKey",
    "Device.ManagementServer.ConnectionRequestURL",
    "InternetGatewayDevice.ManagementServer.ConnectionRequestURL",
    "Device.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ExternalIPAddress",
    "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANPPPConnection.1.ExternalIPAddress",
    "Device.WANDevice.1.WANConnectionDevice.1.WANIPConnection.1.ExternalIPAddress",
    "InternetGatewayDevice.WANDevice.1.WANConnectionDevice.1.WANIPConnection.1.ExternalIPAddress",
];

const DEVICE_ID_FIELDS: [(&str, &str); 4] = [
    ("Manufacturer", "DeviceInfo.Manufacturer"),
    ("OUI", "DeviceInfo.ManufacturerOUI"),
    ("ProductClass", "DeviceInfo.ProductClass"),
    ("SerialNumber", "DeviceInfo.SerialNumber"),
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into(), ..Self::default() }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn child_element(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.local_name() == local)
    }

    pub fn child_text(&self, local: &str) -> Option<&str> {
        self.child(local).map(|child| child.text.as_str())
    }

    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.local_name() == local)
    }

    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| local_part(key) == local)
            .map(|(_, value)| value.as_str())
    }

    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn xml_error(err: impl std::fmt::Display) -> CodecError {
    CodecError::Xml(err.to_string())
}

pub fn parse_document(input: &str) -> Result<XmlElement, CodecError> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let mut element =
                    stack.pop().ok_or_else(|| CodecError::Xml("unbalanced end tag".into()))?;
                if !element.children.is_empty() && element.text.trim().is_empty() {
                    element.text.clear();
                }
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::Xml("unexpected end of document".into()));
    }
    root.ok_or(CodecError::EmptyDocument)
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, CodecError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// An outbound CWMP message: the `cwmp:ID` header plus at most one body element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub id: String,
    pub body: Option<XmlElement>,
}

impl Envelope {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), body: None }
    }

    pub fn set_body(&mut self, body: XmlElement) {
        self.body = Some(body);
    }

    pub fn to_xml(&self) -> String {
        let mut envelope = XmlElement::new("soap-env:Envelope");
        for (prefix, uri) in NAMESPACES {
            envelope = envelope.attr(format!("xmlns:{prefix}"), uri);
        }
        let id = XmlElement::with_text("cwmp:ID", self.id.as_str())
            .attr("soap-env:mustUnderstand", "1");
        envelope.push(XmlElement::new("soap-env:Header").child_element(id));
        let body = envelope.push(XmlElement::new("soap-env:Body"));
        if let Some(method) = &self.body {
            body.children.push(method.clone());
        }

        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        envelope.write_to(&mut out);
        out
    }
}

/// A parsed envelope received from the ACS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub id: Option<String>,
    pub method: Option<XmlElement>,
}

impl InboundEnvelope {
    pub fn parse(input: &str) -> Result<Self, CodecError> {
        let root = parse_document(input)?;
        if root.local_name() != "Envelope" {
            return Err(CodecError::NotAnEnvelope(root.name));
        }
        let id = root
            .child("Header")
            .and_then(|header| header.child_text("ID"))
            .map(|id| id.trim().to_string());
        let mut root = root;
        let body_index = root
            .children
            .iter()
            .position(|child| child.local_name() == "Body")
            .ok_or_else(|| CodecError::MissingElement("Envelope/Body".into()))?;
        let body = root.children.swap_remove(body_index);
        let method = body.children.into_iter().next();
        Ok(Self { id, method })
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method.as_ref().map(XmlElement::local_name)
    }

    /// `(FaultCode, FaultString)` when the body is a SOAP fault.
    pub fn fault(&self) -> Option<(String, String)> {
        let method = self.method.as_ref().filter(|method| method.local_name() == "Fault")?;
        let detail = method.child("detail").and_then(|detail| detail.child("Fault"));
        let code = detail
            .and_then(|fault| fault.child_text("FaultCode"))
            .or_else(|| method.child_text("faultcode"))
            .unwrap_or_default();
        let message = detail
            .and_then(|fault| fault.child_text("FaultString"))
            .or_else(|| method.child_text("faultstring"))
            .unwrap_or_default();
        Some((code.trim().to_string(), message.trim().to_string()))
    }
}

pub fn fault_element(code: &str, message: &str) -> XmlElement {
    let detail = XmlElement::new("cwmp:Fault")
        .child_element(XmlElement::with_text("FaultCode", code))
        .child_element(XmlElement::with_text("FaultString", message));
    XmlElement::new("soap-env:Fault")
        .child_element(XmlElement::with_text("faultcode", "Client"))
        .child_element(XmlElement::with_text("faultstring", "CWMP fault"))
        .child_element(XmlElement::new("detail").child_element(detail))
}

pub fn render_fault(envelope: &mut Envelope, code: &str, message: &str) {
    envelope.set_body(fault_element(code, message));
}

/// `cwmp:TransferComplete` for a finished (or abandoned) download.
pub fn render_transfer_complete(
    envelope: &mut Envelope,
    command_key: &str,
    start_time: &str,
    fault_code: &str,
    fault_string: &str,
) {
    let fault = XmlElement::new("FaultStruct")
        .child_element(XmlElement::with_text("FaultCode", fault_code))
        .child_element(XmlElement::with_text("FaultString", fault_string));
    envelope.set_body(
        XmlElement::new("cwmp:TransferComplete")
            .child_element(XmlElement::with_text("CommandKey", command_key))
            .child_element(XmlElement::with_text("StartTime", start_time))
            .child_element(XmlElement::with_text("CompleteTime", now_iso8601()))
            .child_element(fault),
    );
}

pub fn render_inform(store: &ParameterStore, envelope: &mut Envelope, event: Option<&str>) {
    let mut device_id = XmlElement::new("DeviceId");
    for (field, suffix) in DEVICE_ID_FIELDS {
        if let Some(value) = store.root_value(suffix) {
            device_id.push(XmlElement::with_text(field, value.to_wire()));
        }
    }

    let event_struct = XmlElement::new("EventStruct")
        .child_element(XmlElement::with_text("EventCode", event.unwrap_or(EVENT_PERIODIC)))
        .child_element(XmlElement::new("CommandKey"));

    let mut parameters = Vec::new();
    for path in INFORM_PARAMETERS {
        if let Some(value) = store.value(path) {
            let value_node =
                XmlElement::with_text("Value", value.to_wire()).attr("xsi:type", value.type_tag());
            parameters.push(
                XmlElement::new("ParameterValueStruct")
                    .child_element(XmlElement::with_text("Name", path))
                    .child_element(value_node),
            );
        }
    }
    let mut parameter_list = XmlElement::new("ParameterList")
        .attr("soap-enc:arrayType", format!("cwmp:ParameterValueStruct[{}]", parameters.len()));
    parameter_list.children = parameters;

    let inform = XmlElement::new("cwmp:Inform")
        .child_element(device_id)
        .child_element(
            XmlElement::new("Event")
                .attr("soap-enc:arrayType", "cwmp:EventStruct[1]")
                .child_element(event_struct),
        )
        .child_element(XmlElement::with_text("MaxEnvelopes", "1"))
        .child_element(XmlElement::with_text("CurrentTime", now_iso8601()))
        .child_element(XmlElement::with_text("RetryCount", "0"))
        .child_element(parameter_list);
    envelope.set_body(inform);
}

use bstr::ByteSlice;
use http::{HeaderMap, HeaderValue};
use log::debug;

use crate::{
    request_response::{collapse_form, Body, FormFields},
    template,
    utils::HttpSimError,
    values::ValueStore,
};

use super::Step;

/// Renders a body fragment. Output identical to the input is an error.
fn render_changed(values: &ValueStore, source: &str) -> Result<String, HttpSimError> {
    let output = template::render(source, values)?;
    if output == source {
        return Err(HttpSimError::NoOpSubstitution);
    }

    Ok(output)
}

fn render_form(values: &ValueStore, fields: &FormFields) -> Result<FormFields, HttpSimError> {
    let mut rendered: FormFields = Vec::with_capacity(fields.len());
    for (key, value) in collapse_form(fields) {
        rendered.push((template::render(&key, values)?, template::render(&value, values)?));
    }

    Ok(rendered)
}

impl Step {
    /// Rough check that the request holds at least one placeholder per
    /// declared input key. Does not parse anything.
    pub fn sanity_check(&self) -> Result<(), HttpSimError> {
        let found = self.request.body.count_placeholders()
            + template::count_placeholders(&self.request.headers_text())
            + template::count_placeholders(&self.request.url);

        if found < self.keys_input.len() {
            debug!("Step - '{}' has {} placeholders for {} input keys", &self.name, found, self.keys_input.len());
            return Err(HttpSimError::NotEnoughReplacements);
        }

        Ok(())
    }

    /// Substitutes values into the body. Only done when the step declares
    /// input keys.
    pub fn replace_in_body(&mut self, values: &ValueStore) -> Result<(), HttpSimError> {
        if self.keys_input.is_empty() {
            return Ok(());
        }

        let new_body = match &self.request.body {
            Body::Empty => return Ok(()),
            Body::Text(text) => Body::Text(render_changed(values, text)?),
            Body::Bytes(bytes) => {
                let Ok(text) = std::str::from_utf8(bytes) else {
                    return Err(HttpSimError::Template("raw body is not valid UTF-8 and cannot hold placeholders".to_string()));
                };

                Body::Bytes(render_changed(values, text)?.into_bytes())
            },
            Body::Form(fields) => Body::Form(render_form(values, fields)?)
        };

        self.request.body = new_body;
        Ok(())
    }

    pub fn replace_in_header(&mut self, values: &ValueStore) -> Result<(), HttpSimError> {
        let mut headers = HeaderMap::with_capacity(self.request.headers.len());
        for (key, value) in self.request.headers.iter() {
            let Ok(text) = value.as_bytes().to_str() else {
                let err_str = format!("value of header '{}' is not valid UTF-8", key.as_str());
                return Err(HttpSimError::InvalidRequest(err_str));
            };

            let rendered = template::render(text, values)?;
            headers.append(key.clone(), HeaderValue::from_str(&rendered)?);
        }

        self.request.headers = headers;
        Ok(())
    }

    pub fn replace_in_url(&mut self, values: &ValueStore) -> Result<(), HttpSimError> {
        self.request.url = template::render(&self.request.url, values)?;
        Ok(())
    }
}

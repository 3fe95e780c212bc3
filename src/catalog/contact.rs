use serde::{Deserialize, Serialize};

use crate::settings::ContactSettings;

use super::Product;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ContactChannel {
    Call,
    WhatsApp,
    Sms,
    Email,
}

impl ContactChannel {
    pub fn label(&self) -> &'static str {
        match self {
            ContactChannel::Call => "Call",
            ContactChannel::WhatsApp => "WhatsApp",
            ContactChannel::Sms => "SMS",
            ContactChannel::Email => "Email",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContactLink {
    pub channel: ContactChannel,
    pub href: String,
}

pub fn contact_message(product: &Product, price_label: &str) -> String {
    format!("Hello, I'm interested in: {} - {}", product.name, price_label)
}

/// Deep link that opens the channel's app prefilled with the product enquiry.
pub fn deep_link(
    channel: ContactChannel,
    contact: &ContactSettings,
    product: &Product,
    price_label: &str,
) -> ContactLink {
    let message = contact_message(product, price_label);
    let href = match channel {
        ContactChannel::Call => format!("tel:{}", contact.phone),
        ContactChannel::WhatsApp => format!(
            "https://wa.me/{}?text={}",
            contact.whatsapp,
            urlencoding::encode(&message)
        ),
        ContactChannel::Sms => format!("sms:{}?body={}", contact.phone, urlencoding::encode(&message)),
        ContactChannel::Email => {
            let subject = format!("Enquiry: {}", product.name);
            format!(
                "mailto:{}?subject={}&body={}",
                contact.email,
                urlencoding::encode(&subject),
                urlencoding::encode(&message)
            )
        }
    };
    ContactLink { channel, href }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ImageUrls, Product, RawProduct};

    fn product() -> Product {
        let raw: RawProduct =
            serde_json::from_str(r#"{"id": 7, "name": "Mesa & Silla", "price_min": 5, "price_max": 5}"#)
                .unwrap();
        Product::from_raw(raw, &ImageUrls::new("./img/", None))
    }

    fn contact() -> ContactSettings {
        ContactSettings {
            phone: "+15550100".into(),
            whatsapp: "15550100".into(),
            email: "sales@shop.test".into(),
            vendor_name: "Shop".into(),
        }
    }

    #[test]
    fn call_link_is_plain_tel() {
        let link = deep_link(ContactChannel::Call, &contact(), &product(), "$5.00");
        assert_eq!(link.href, "tel:+15550100");
    }

    #[test]
    fn message_links_are_percent_encoded() {
        let whatsapp = deep_link(ContactChannel::WhatsApp, &contact(), &product(), "$5.00");
        assert_eq!(
            whatsapp.href,
            "https://wa.me/15550100?text=Hello%2C%20I%27m%20interested%20in%3A%20Mesa%20%26%20Silla%20-%20%245.00"
        );

        let sms = deep_link(ContactChannel::Sms, &contact(), &product(), "$5.00");
        assert!(sms.href.starts_with("sms:+15550100?body=Hello%2C"));

        let email = deep_link(ContactChannel::Email, &contact(), &product(), "$5.00");
        assert!(email
            .href
            .starts_with("mailto:sales@shop.test?subject=Enquiry%3A%20Mesa%20%26%20Silla&body="));
    }
}
